//! Transaction data model: identity, lifecycle state, and the structured log
//! that accompanies a single attempt to change the running configuration.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Opaque, stable transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

/// Where a transaction originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    File,
    Api,
    Rollback,
    Test,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::File => "file",
            Source::Api => "api",
            Source::Rollback => "rollback",
            Source::Test => "test",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle states, per the edges in spec.md §4.2. `Committed`, `Compensated`
/// and `Failed` are terminal: once reached, no further transition is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Created,
    Valid,
    Prepared,
    Committed,
    Compensated,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Compensated | TransactionState::Failed
        )
    }

    /// Whether `self -> next` is one of the edges spec.md §4.2 defines.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Created, Valid)
                | (Created, Failed)
                | (Valid, Failed)
                | (Valid, Prepared)
                | (Valid, Compensated)
                | (Prepared, Committed)
                | (Prepared, Compensated)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

pub type LogFields = BTreeMap<String, String>;

/// One append-only entry in a transaction's structured log.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub level: LogLevel,
    pub message: String,
    pub fields: LogFields,
}

/// Bound implemented by whatever configuration type a deployment uses.
///
/// The core engine never interprets the configuration itself (spec.md §3:
/// "config... opaque to core"); it only needs to know how to ask the payload
/// whether it is statically valid, so that the `created -> valid` /
/// `created -> failed` transitions in spec.md §4.2 can be driven generically.
pub trait ConfigPayload: Clone + Send + Sync + 'static {
    /// Structural and semantic validation. `Err` carries a human-readable
    /// summary suitable for surfacing to the submitter (spec.md §6, `Apply`).
    fn validate(&self) -> std::result::Result<(), String>;
}

/// One attempt to change the running configuration.
#[derive(Debug, Clone)]
pub struct Transaction<C> {
    id: TransactionId,
    source: Source,
    source_detail: String,
    request_id: String,
    created_at: DateTime<Utc>,
    config: C,
    state: TransactionState,
    is_valid: bool,
    logs: Vec<LogEntry>,
}

impl<C: ConfigPayload> Transaction<C> {
    /// Construct a freshly-created transaction. `state` starts at `Created`
    /// per spec.md §3; it has not yet been validated.
    pub fn new(source: Source, source_detail: impl Into<String>, request_id: impl Into<String>, config: C) -> Self {
        Self {
            id: TransactionId::new(),
            source,
            source_detail: source_detail.into(),
            request_id: request_id.into(),
            created_at: Utc::now(),
            config,
            state: TransactionState::Created,
            is_valid: false,
            logs: Vec::new(),
        }
    }

    /// Build a rollback transaction whose payload equals `origin`'s, per
    /// spec.md §4.5 / §9 ("Rollback should emit a new transaction").
    pub fn new_rollback(origin: &Transaction<C>) -> Self {
        Self::new(Source::Rollback, origin.id.to_string(), "", origin.config.clone())
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn source_detail(&self) -> &str {
        &self.source_detail
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    /// Move to `next`. Panics if `next` is not reachable from the current
    /// state — this is an engine invariant (spec.md §3), never a condition a
    /// participant or producer can trigger, so a silent `Result` would only
    /// hide an orchestrator bug.
    pub fn transition(&mut self, next: TransactionState) {
        assert!(
            self.state.can_transition_to(next),
            "invalid transition {:?} -> {:?} for transaction {}",
            self.state,
            next,
            self.id
        );
        if next == TransactionState::Valid {
            self.is_valid = true;
        }
        self.state = next;
    }

    pub fn log(&mut self, stage: impl Into<String>, level: LogLevel, message: impl Into<String>, fields: LogFields) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            stage: stage.into(),
            level,
            message: message.into(),
            fields,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct Dummy(bool);

    impl ConfigPayload for Dummy {
        fn validate(&self) -> std::result::Result<(), String> {
            if self.0 {
                Ok(())
            } else {
                Err("invalid dummy".into())
            }
        }
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut tx = Transaction::new(Source::Test, "", "", Dummy(true));
        assert_eq!(tx.state(), TransactionState::Created);
        tx.transition(TransactionState::Valid);
        assert!(tx.is_valid());
        tx.transition(TransactionState::Prepared);
        tx.transition(TransactionState::Committed);
        assert!(tx.state().is_terminal());
    }

    #[test]
    #[should_panic]
    fn cannot_skip_states() {
        let mut tx = Transaction::new(Source::Test, "", "", Dummy(true));
        tx.transition(TransactionState::Committed);
    }

    #[test]
    fn rollback_copies_the_payload() {
        let tx = Transaction::new(Source::Api, "", "", Dummy(true));
        let rb = Transaction::new_rollback(&tx);
        assert_eq!(rb.source(), Source::Rollback);
        assert_eq!(rb.source_detail(), tx.id().to_string());
    }

    #[test]
    fn ids_are_never_reused_and_sort_with_creation_order() {
        let a = TransactionId::new();
        let b = TransactionId::new();
        assert_ne!(a, b);
    }
}
