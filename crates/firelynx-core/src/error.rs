//! Error types for the firelynx configuration rollout engine.

use thiserror::Error;

use crate::transaction::TransactionId;

/// Errors raised by the core rollout engine (store, fan-in, orchestrator, manager).
///
/// Invalid state transitions and an empty `FanIn` producer list are not
/// represented here: both are caller bugs rather than conditions a producer
/// or participant can trigger at runtime, so [`Transaction::transition`](crate::transaction::Transaction::transition)
/// and [`FanIn::new`](crate::fanin::FanIn::new) assert instead of returning
/// a recoverable `Result` a caller could plausibly ignore.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("a participant named {0:?} is already registered")]
    DuplicateParticipant(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("rollout was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CoreError>;
