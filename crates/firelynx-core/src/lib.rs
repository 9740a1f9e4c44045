//! The firelynx configuration rollout engine core: fan-in, transaction
//! lifecycle, saga orchestration, and the transaction manager loop.
//!
//! This crate is deliberately ignorant of HTTP, TOML, and process
//! lifecycle — it only knows how to move a generic, validatable
//! configuration payload through prepare/commit/compensate across whatever
//! participants are registered, recording every step. See `firelynx-listener`
//! for the HTTP listener manager participant, and `firelynx-config` for the
//! on-disk configuration schema and producers.

pub mod error;
pub mod fanin;
pub mod manager;
pub mod orchestrator;
pub mod participant;
pub mod store;
pub mod transaction;

pub use error::{CoreError, Result};
pub use fanin::{FanIn, ProducerHandle};
pub use manager::{TransactionManager, TransactionManagerHandle};
pub use orchestrator::SagaOrchestrator;
pub use participant::{Participant, ParticipantFailure};
pub use store::{Page, PageToken, SourceFilter, StateFilter, TransactionStore};
pub use transaction::{ConfigPayload, LogEntry, LogFields, LogLevel, Source, Transaction, TransactionId, TransactionState};

pub use tokio_util::sync::CancellationToken;
