//! Firelynx server binary.
//!
//! Parses CLI flags, loads the initial configuration, wires the file
//! producer and the in-process API producer through `FanIn` into a
//! `TransactionManager`/`SagaOrchestrator` pair with the HTTP listener
//! manager registered as the sole participant, and runs until a shutdown
//! signal arrives.
//!
//! A network-facing control-plane RPC service exposing `Apply`/`Validate`/
//! `Rollback`/`GetConfig` is out of scope here; `ApiProducerHandle`
//! implements the same semantics in-process and is kept only to demonstrate
//! the wiring such a service would sit behind.

mod args;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use firelynx_config::{api_producer, loader, FileProducer, RuntimeConfig};
use firelynx_core::{FanIn, ProducerHandle, SagaOrchestrator, TransactionManager, TransactionStore};
use firelynx_listener::ListenerManager;

use crate::args::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_logging(&args.log_level, &args.log_format)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting firelynx-server");

    let initial = match &args.config {
        Some(path) => loader::load(Some(path.as_str())).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "initial config load failed; starting empty, the file producer will retry");
            RuntimeConfig::default()
        }),
        None => RuntimeConfig::default(),
    };
    if let Err(e) = initial.validate_structural() {
        tracing::warn!(error = %e, "initial config failed static validation");
    }

    let token = CancellationToken::new();

    let (api_handle, api_producer_handle) = api_producer();
    let mut producers: Vec<ProducerHandle<RuntimeConfig>> = vec![api_producer_handle];

    // Rollback enqueues through this same producer mechanism: its receiver
    // is just another `FanIn` producer, and the sender half is handed to
    // `TransactionManager` as its rollback sink.
    let (rollback_tx, rollback_rx) = tokio::sync::mpsc::channel(8);
    producers.push(ProducerHandle {
        name: "rollback".to_string(),
        receiver: rollback_rx,
    });

    let (reload_tx, file_task) = if let Some(path) = &args.config {
        let (file_producer, handle, reload_tx) = FileProducer::new(path.clone(), Duration::from_millis(args.file_debounce_ms));
        producers.push(handle);
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = file_producer.run(run_token).await {
                tracing::error!(error = %e, "file producer exited with an error");
            }
        });
        (Some(reload_tx), Some(task))
    } else {
        (None, None)
    };

    let fanin = FanIn::new(token.clone(), producers);

    let mut orchestrator: SagaOrchestrator<RuntimeConfig> = SagaOrchestrator::new().with_stage_timeout(Duration::from_secs(30));
    let listener_manager = Arc::new(ListenerManager::new("http-listener"));
    orchestrator.register(listener_manager.clone())?;

    let store = Arc::new(TransactionStore::new(args.max_history));
    let manager = TransactionManager::new(orchestrator, store.clone(), fanin.output(), rollback_tx, token.clone());
    let manager_handle = manager.handle();
    let manager_task = tokio::spawn(manager.run());

    // Kept alive for the lifetime of the process: a real control-RPC
    // service would hold both of these to answer Apply/Validate/queries.
    // Neither is exercised further here since that service is out of scope.
    let _ = &api_handle;
    let _ = &manager_handle;

    shutdown_signal(reload_tx).await;
    tracing::info!("shutdown signal received, draining");
    token.cancel();

    let _ = manager_task.await;
    if let Some(task) = file_task {
        let _ = task.await;
    }
    listener_manager.shutdown_all().await;

    tracing::info!("firelynx-server shutdown complete");
    Ok(())
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(env_filter);
    match format {
        "json" => subscriber.with(fmt::layer().json().with_target(true)).init(),
        _ => subscriber.with(fmt::layer().pretty().with_target(true)).init(),
    }
    Ok(())
}

/// Ctrl+C, SIGTERM, or (forwarded to `reload_tx` rather than treated as
/// shutdown) SIGHUP.
async fn shutdown_signal(reload_tx: Option<tokio::sync::mpsc::Sender<()>>) {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    #[cfg(unix)]
    let hangup = async move {
        let mut hup = signal::unix::signal(signal::unix::SignalKind::hangup()).expect("failed to install SIGHUP handler");
        loop {
            hup.recv().await;
            tracing::info!("received SIGHUP, triggering config reload");
            if let Some(tx) = &reload_tx {
                let _ = tx.send(()).await;
            } else {
                tracing::debug!("SIGHUP received but no file producer is configured");
            }
        }
    };
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
        _ = hangup => {}
    }
}
