//! Stands in for the out-of-scope control-RPC service: the `Apply`/
//! `Validate` semantics are implemented directly against this producer
//! rather than over a wire protocol.

use tokio::sync::mpsc;

use firelynx_core::{ProducerHandle, Source, Transaction, TransactionId};

use crate::schema::RuntimeConfig;

const CHANNEL_CAPACITY: usize = 32;

/// Result of `Validate(config)`: static validation only, never a
/// transaction.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub error: Option<String>,
}

/// Error returned by `Apply` when the producer's channel has already closed
/// (the manager loop exited).
#[derive(Debug, thiserror::Error)]
#[error("apply was rejected: the transaction manager is no longer accepting work")]
pub struct ApplyRejected;

/// Cheap, cloneable front door for the in-process equivalent of the
/// control-RPC service: `Apply` enqueues a transaction and returns
/// immediately, without waiting for rollout completion; `Validate` never
/// touches the producer stream at all.
#[derive(Clone)]
pub struct ApiProducerHandle {
    sender: mpsc::Sender<Transaction<RuntimeConfig>>,
}

impl ApiProducerHandle {
    /// `Apply(config)`. Returns the new transaction's id so the caller can
    /// poll `GetTransaction(id)` for the terminal state if it wants to
    /// await completion.
    pub async fn apply(&self, config: RuntimeConfig, request_id: impl Into<String>) -> Result<TransactionId, ApplyRejected> {
        let tx = Transaction::new(Source::Api, "api", request_id, config);
        let id = tx.id();
        self.sender.send(tx).await.map_err(|_| ApplyRejected)?;
        Ok(id)
    }

    /// `Validate(config)`: static validation only. Must never enqueue a
    /// transaction or touch a participant — this is a pure function of the
    /// payload, so it neither needs nor uses the channel.
    pub fn validate(&self, config: &RuntimeConfig) -> ValidationResult {
        match config.validate_structural() {
            Ok(()) => ValidationResult { valid: true, error: None },
            Err(e) => ValidationResult { valid: false, error: Some(e) },
        }
    }
}

/// Constructs the channel half the `ApiProducerHandle` sends into and the
/// [`ProducerHandle`] a `FanIn` consumes from.
pub fn api_producer() -> (ApiProducerHandle, ProducerHandle<RuntimeConfig>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (
        ApiProducerHandle { sender: tx },
        ProducerHandle {
            name: "api".to_string(),
            receiver: rx,
        },
    )
}
