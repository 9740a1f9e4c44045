//! Drives prepare/commit/compensate across registered participants for one
//! transaction at a time (spec.md §4.4).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::participant::{Participant, ParticipantFailure};
use crate::transaction::{ConfigPayload, LogLevel, Transaction, TransactionState};

/// Sequences prepare/commit/compensate across an ordered set of participants.
/// Registration order is the prepare/commit order; compensation runs in
/// reverse registration order (spec.md §4.4).
pub struct SagaOrchestrator<C> {
    participants: Vec<Arc<dyn Participant<C>>>,
    /// Per-stage timeout. Recommended, not a core invariant (spec.md §4.4).
    stage_timeout: Option<Duration>,
}

impl<C: ConfigPayload> SagaOrchestrator<C> {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            stage_timeout: None,
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    /// Register a participant. Re-registering a name already present is an
    /// error (spec.md §9, "Re-registration is an error").
    pub fn register(&mut self, participant: Arc<dyn Participant<C>>) -> Result<()> {
        if self.participants.iter().any(|p| p.name() == participant.name()) {
            return Err(CoreError::DuplicateParticipant(participant.name().to_string()));
        }
        self.participants.push(participant);
        Ok(())
    }

    pub fn participant_names(&self) -> Vec<&str> {
        self.participants.iter().map(|p| p.name()).collect()
    }

    /// Run the saga for `tx`, mutating its state and log in place. Always
    /// leaves `tx` in a terminal state (spec.md §8, property 2).
    pub async fn run(&self, tx: &mut Transaction<C>, token: &CancellationToken) {
        let mut prepared_ok: Vec<Arc<dyn Participant<C>>> = Vec::new();

        for participant in &self.participants {
            tx.log(
                "prepare",
                LogLevel::Info,
                format!("prepare.start participant={}", participant.name()),
                fields([("participant", participant.name())]),
            );
            let started = Instant::now();
            match self.call(participant.prepare(tx, token), token).await {
                Ok(()) => {
                    tx.log(
                        "prepare",
                        LogLevel::Info,
                        format!("prepare.ok participant={}", participant.name()),
                        stage_fields(participant.name(), started.elapsed(), None),
                    );
                    prepared_ok.push(participant.clone());
                }
                Err(e) => {
                    tx.log(
                        "prepare",
                        LogLevel::Error,
                        format!("prepare.fail participant={}: {}", participant.name(), e.message),
                        stage_fields(participant.name(), started.elapsed(), Some(&e.message)),
                    );
                    self.rollback(&prepared_ok, &[], tx).await;
                    tx.transition(TransactionState::Compensated);
                    return;
                }
            }
        }

        tx.transition(TransactionState::Prepared);

        let mut committed_ok: Vec<Arc<dyn Participant<C>>> = Vec::new();
        for participant in &self.participants {
            let started = Instant::now();
            match self.call(participant.commit(tx, token), token).await {
                Ok(()) => {
                    tx.log(
                        "commit",
                        LogLevel::Info,
                        format!("commit.ok participant={}", participant.name()),
                        stage_fields(participant.name(), started.elapsed(), None),
                    );
                    committed_ok.push(participant.clone());
                }
                Err(e) => {
                    tx.log(
                        "commit",
                        LogLevel::Error,
                        format!("commit.fail participant={}: {}", participant.name(), e.message),
                        stage_fields(participant.name(), started.elapsed(), Some(&e.message)),
                    );
                    self.rollback(&prepared_ok, &committed_ok, tx).await;
                    tx.transition(TransactionState::Compensated);
                    return;
                }
            }
        }

        tx.transition(TransactionState::Committed);
    }

    async fn call<F>(&self, fut: F, token: &CancellationToken) -> std::result::Result<(), ParticipantFailure>
    where
        F: std::future::Future<Output = std::result::Result<(), ParticipantFailure>>,
    {
        let guarded = async {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(ParticipantFailure::cancelled()),
                res = fut => res,
            }
        };
        match self.stage_timeout {
            None => guarded.await,
            Some(d) => match tokio::time::timeout(d, guarded).await {
                Ok(res) => res,
                Err(_) => Err(ParticipantFailure::new("stage timed out")),
            },
        }
    }

    /// Compensate every participant that previously succeeded for this
    /// transaction, in reverse registration order (spec.md §8, property 4).
    async fn rollback(
        &self,
        prepared: &[Arc<dyn Participant<C>>],
        committed: &[Arc<dyn Participant<C>>],
        tx: &mut Transaction<C>,
    ) {
        let succeeded: std::collections::HashSet<&str> = prepared
            .iter()
            .chain(committed.iter())
            .map(|p| p.name())
            .collect();

        for participant in self.participants.iter().rev() {
            if !succeeded.contains(participant.name()) {
                continue;
            }
            let started = Instant::now();
            match participant.compensate(tx).await {
                Ok(()) => {
                    tx.log(
                        "compensate",
                        LogLevel::Info,
                        format!("compensate.ok participant={}", participant.name()),
                        stage_fields(participant.name(), started.elapsed(), None),
                    );
                }
                Err(e) => {
                    // Never propagated: spec.md §4.3, Compensate's failure effect is "—".
                    tx.log(
                        "compensate",
                        LogLevel::Error,
                        format!("compensate.fail participant={}: {}", participant.name(), e.message),
                        stage_fields(participant.name(), started.elapsed(), Some(&e.message)),
                    );
                }
            }
        }
    }
}

impl<C: ConfigPayload> Default for SagaOrchestrator<C> {
    fn default() -> Self {
        Self::new()
    }
}

fn fields<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<String, String> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Structured fields for a completed prepare/commit/compensate call: the
/// participant name, how long the call took, and its error message if it
/// failed (spec.md §4.2: every transition log entry carries "the stage
/// name, participant name..., elapsed time, and any error message").
fn stage_fields(participant: &str, elapsed: Duration, error: Option<&str>) -> BTreeMap<String, String> {
    let mut f = fields([("participant", participant)]);
    f.insert("elapsed_ms".to_string(), elapsed.as_millis().to_string());
    if let Some(error) = error {
        f.insert("error".to_string(), error.to_string());
    }
    f
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct Dummy;
    impl ConfigPayload for Dummy {
        fn validate(&self) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    struct Scripted {
        name: &'static str,
        fail_prepare: bool,
        fail_commit: bool,
        compensated: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Participant<Dummy> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn prepare(&self, _tx: &Transaction<Dummy>, _token: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
            if self.fail_prepare {
                Err(ParticipantFailure::new("nope"))
            } else {
                Ok(())
            }
        }

        async fn commit(&self, _tx: &Transaction<Dummy>, _token: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
            if self.fail_commit {
                Err(ParticipantFailure::new("nope"))
            } else {
                Ok(())
            }
        }

        async fn compensate(&self, _tx: &Transaction<Dummy>) -> std::result::Result<(), ParticipantFailure> {
            self.compensated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tx() -> Transaction<Dummy> {
        let mut t = Transaction::new(Source::Test, "", "", Dummy);
        t.transition(TransactionState::Valid);
        t
    }

    #[tokio::test]
    async fn happy_path_commits() {
        let mut orch = SagaOrchestrator::new();
        let compensated = Arc::new(AtomicUsize::new(0));
        orch.register(Arc::new(Scripted {
            name: "listener",
            fail_prepare: false,
            fail_commit: false,
            compensated: compensated.clone(),
        }))
        .unwrap();

        let mut t = tx();
        orch.run(&mut t, &CancellationToken::new()).await;
        assert_eq!(t.state(), TransactionState::Committed);
        assert_eq!(compensated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn commit_failure_compensates_everyone_that_succeeded() {
        let mut orch = SagaOrchestrator::new();
        let compensated = Arc::new(AtomicUsize::new(0));
        orch.register(Arc::new(Scripted {
            name: "first",
            fail_prepare: false,
            fail_commit: false,
            compensated: compensated.clone(),
        }))
        .unwrap();
        orch.register(Arc::new(Scripted {
            name: "second",
            fail_prepare: false,
            fail_commit: true,
            compensated: compensated.clone(),
        }))
        .unwrap();

        let mut t = tx();
        orch.run(&mut t, &CancellationToken::new()).await;
        assert_eq!(t.state(), TransactionState::Compensated);
        // Both participants prepared; "first" also committed. Both must be
        // compensated exactly once even though only "second" failed.
        assert_eq!(compensated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn prepare_failure_never_calls_commit() {
        let mut orch = SagaOrchestrator::new();
        let compensated = Arc::new(AtomicUsize::new(0));
        orch.register(Arc::new(Scripted {
            name: "first",
            fail_prepare: true,
            fail_commit: false,
            compensated: compensated.clone(),
        }))
        .unwrap();

        let mut t = tx();
        orch.run(&mut t, &CancellationToken::new()).await;
        assert_eq!(t.state(), TransactionState::Compensated);
        assert_eq!(compensated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut orch = SagaOrchestrator::new();
        let compensated = Arc::new(AtomicUsize::new(0));
        orch.register(Arc::new(Scripted {
            name: "dup",
            fail_prepare: false,
            fail_commit: false,
            compensated: compensated.clone(),
        }))
        .unwrap();
        let err = orch
            .register(Arc::new(Scripted {
                name: "dup",
                fail_prepare: false,
                fail_commit: false,
                compensated,
            }))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateParticipant(_)));
    }
}
