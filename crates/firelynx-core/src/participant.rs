//! The participant contract (spec.md §4.3): subsystems that stage, commit,
//! and compensate a configuration change.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::transaction::Transaction;

/// Returned by a failed `prepare`/`commit` call. `Compensate` never returns
/// this — its errors are logged but must never fail the saga (spec.md §4.3).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ParticipantFailure {
    pub message: String,
}

impl ParticipantFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    pub fn cancelled() -> Self {
        Self::new("operation cancelled")
    }
}

/// A subsystem registered with the [`SagaOrchestrator`](crate::orchestrator::SagaOrchestrator).
/// At most one transaction is ever in flight against a participant at a
/// time — the orchestrator serializes transactions, so implementations may
/// assume no concurrent staging (spec.md §3, §5).
#[async_trait]
pub trait Participant<C>: Send + Sync {
    /// Stable identifier, unique among participants registered with the same
    /// orchestrator. Used for logging and for compensation ordering.
    fn name(&self) -> &str;

    /// Stage everything needed to serve `tx`'s configuration without yet
    /// exposing it. A no-op success is a valid response when `tx` does not
    /// affect this participant.
    async fn prepare(&self, tx: &Transaction<C>, token: &CancellationToken) -> Result<(), ParticipantFailure>;

    /// Atomically swap the live state to what was staged in `prepare`.
    /// Traffic must see the new configuration from the moment this call
    /// returns successfully.
    async fn commit(&self, tx: &Transaction<C>, token: &CancellationToken) -> Result<(), ParticipantFailure>;

    /// Undo a `prepare` (or, if `commit` already ran, swap back and release
    /// what `commit` put in place). Must be idempotent and must always make
    /// forward progress — an internal failure here is logged by the caller
    /// but never propagated into the saga's outcome.
    async fn compensate(&self, tx: &Transaction<C>) -> Result<(), ParticipantFailure>;
}
