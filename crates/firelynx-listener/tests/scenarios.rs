//! End-to-end scenarios S1 and S3 from spec.md §8, driven through a real
//! `SagaOrchestrator` against the `ListenerManager` and a raw TCP client —
//! no HTTP client crate, matching the restraint described in SPEC_FULL.md
//! §B.5.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use firelynx_config::{AppConfig, ApplicationConfig, EndpointConfig, ListenerConfig, Method, RouteConfig, RuntimeConfig};
use firelynx_core::{Participant, ParticipantFailure, SagaOrchestrator, Source, Transaction, TransactionState};
use firelynx_listener::ListenerManager;

fn echo_config(listener_id: &str) -> RuntimeConfig {
    RuntimeConfig {
        listeners: vec![ListenerConfig {
            id: listener_id.into(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            drain_deadline_ms: 200,
        }],
        applications: vec![ApplicationConfig {
            name: "echo".into(),
            app: AppConfig::Echo { status: 200 },
        }],
        endpoints: vec![EndpointConfig {
            id: "e1".into(),
            listener_id: listener_id.into(),
            routes: vec![RouteConfig {
                path: "/echo".into(),
                method: Method::Any,
                app: "echo".into(),
            }],
        }],
        parse_error: None,
    }
}

fn get(addr: std::net::SocketAddr, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes())
        .unwrap();
    let mut buf = String::new();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.read_to_string(&mut buf).unwrap();
    let status_line = buf.lines().next().unwrap_or("");
    let status: u16 = status_line.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    (status, buf)
}

/// Test-only participant whose prepare/commit behavior is scripted, used to
/// drive S3 (commit failure on a second participant).
struct ScriptedParticipant {
    name: &'static str,
    fail_commit: bool,
}

#[async_trait]
impl Participant<RuntimeConfig> for ScriptedParticipant {
    fn name(&self) -> &str {
        self.name
    }
    async fn prepare(&self, _tx: &Transaction<RuntimeConfig>, _t: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
        Ok(())
    }
    async fn commit(&self, _tx: &Transaction<RuntimeConfig>, _t: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
        if self.fail_commit {
            Err(ParticipantFailure::new("scripted commit failure"))
        } else {
            Ok(())
        }
    }
    async fn compensate(&self, _tx: &Transaction<RuntimeConfig>) -> std::result::Result<(), ParticipantFailure> {
        Ok(())
    }
}

#[tokio::test]
async fn s1_happy_apply_serves_200_on_the_configured_route() {
    let manager = Arc::new(ListenerManager::new("listener"));
    let mut orch: SagaOrchestrator<RuntimeConfig> = SagaOrchestrator::new();
    orch.register(manager.clone()).unwrap();

    let mut tx = Transaction::new(Source::Test, "", "", echo_config("l1"));
    tx.transition(TransactionState::Valid);
    orch.run(&mut tx, &CancellationToken::new()).await;
    assert_eq!(tx.state(), TransactionState::Committed);

    let addr = manager.local_addr("l1").expect("listener should be live after commit");
    let (status, _) = get(addr, "/echo");
    assert_eq!(status, 200);

    manager.shutdown_all().await;
}

#[tokio::test]
async fn s3_commit_failure_rolls_back_and_leaves_no_listener_serving() {
    let manager = Arc::new(ListenerManager::new("listener"));
    let committed = Arc::new(AtomicBool::new(false));

    let mut orch: SagaOrchestrator<RuntimeConfig> = SagaOrchestrator::new();
    orch.register(manager.clone()).unwrap();
    orch.register(Arc::new(ScriptedParticipant {
        name: "failing-second",
        fail_commit: true,
    }))
    .unwrap();

    let mut tx = Transaction::new(Source::Test, "", "", echo_config("l1"));
    tx.transition(TransactionState::Valid);
    orch.run(&mut tx, &CancellationToken::new()).await;

    assert_eq!(tx.state(), TransactionState::Compensated);
    // The listener manager committed, then was told to compensate: the
    // newly-bound listener must be torn down, not left serving.
    assert!(manager.local_addr("l1").is_none());
    let _ = committed;
}
