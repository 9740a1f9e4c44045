//! Long-running loop that drains the merged transaction stream, drives the
//! saga orchestrator, and answers the store-backed queries (spec.md §4.5).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::orchestrator::SagaOrchestrator;
use crate::store::{Page, PageToken, SourceFilter, StateFilter, TransactionStore};
use crate::transaction::{ConfigPayload, LogLevel, Transaction, TransactionId, TransactionState};

/// Cheap, cloneable handle for issuing queries and rollback requests without
/// going through the rollout loop itself (spec.md §5: "Query handlers do not
/// block the rollout loop; they take a read snapshot of the store").
#[derive(Clone)]
pub struct TransactionManagerHandle<C> {
    store: Arc<TransactionStore<C>>,
    rollback_sink: mpsc::Sender<Transaction<C>>,
}

impl<C: ConfigPayload> TransactionManagerHandle<C> {
    pub fn get_current(&self) -> Option<Transaction<C>> {
        self.store.get_current()
    }

    pub fn get_by_id(&self, id: TransactionId) -> Option<Transaction<C>> {
        self.store.get(id)
    }

    pub fn list(
        &self,
        page_token: PageToken,
        page_size: usize,
        state_filter: StateFilter,
        source_filter: SourceFilter,
    ) -> Page<C> {
        self.store.list(page_token, page_size, state_filter, source_filter)
    }

    pub fn clear(&self, keep_last: usize) -> usize {
        self.store.clear(keep_last)
    }

    /// Load `id`, build a new transaction whose payload equals it, and
    /// enqueue it through the same producer mechanism used for API applies
    /// (spec.md §4.5).
    pub async fn rollback(&self, id: TransactionId) -> Result<TransactionId> {
        let origin = self.store.get(id).ok_or(CoreError::TransactionNotFound(id))?;
        let rollback_tx = Transaction::new_rollback(&origin);
        let new_id = rollback_tx.id();
        self.rollback_sink
            .send(rollback_tx)
            .await
            .map_err(|_| CoreError::Cancelled)?;
        Ok(new_id)
    }
}

/// Owns the rollout loop. Built from an orchestrator, a merged transaction
/// source (typically [`FanIn`](crate::fanin::FanIn)'s output), and a store.
pub struct TransactionManager<C> {
    orchestrator: SagaOrchestrator<C>,
    store: Arc<TransactionStore<C>>,
    input: Arc<AsyncMutex<mpsc::Receiver<Transaction<C>>>>,
    rollback_sink: mpsc::Sender<Transaction<C>>,
    token: CancellationToken,
}

impl<C: ConfigPayload> TransactionManager<C> {
    pub fn new(
        orchestrator: SagaOrchestrator<C>,
        store: Arc<TransactionStore<C>>,
        input: Arc<AsyncMutex<mpsc::Receiver<Transaction<C>>>>,
        rollback_sink: mpsc::Sender<Transaction<C>>,
        token: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            store,
            input,
            rollback_sink,
            token,
        }
    }

    pub fn handle(&self) -> TransactionManagerHandle<C> {
        TransactionManagerHandle {
            store: self.store.clone(),
            rollback_sink: self.rollback_sink.clone(),
        }
    }

    /// Drive the loop until the input stream closes or the token cancels.
    /// Consumes `self`: there is only ever one loop per manager.
    pub async fn run(self) {
        loop {
            let next = {
                let mut guard = self.input.lock().await;
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => None,
                    v = guard.recv() => v,
                }
            };
            let Some(mut tx) = next else {
                tracing::info!("transaction manager loop exiting");
                return;
            };

            self.process(&mut tx).await;
        }
    }

    async fn process(&self, tx: &mut Transaction<C>) {
        tracing::info!(
            id = %tx.id(),
            source = %tx.source(),
            "received transaction"
        );
        self.store.upsert(tx.clone());

        match tx.config().validate() {
            Ok(()) => {
                tx.transition(TransactionState::Valid);
                tx.log("validate", LogLevel::Info, "validation passed", Default::default());
                self.store.upsert(tx.clone());
            }
            Err(reason) => {
                tx.log("validate", LogLevel::Error, format!("validation failed: {reason}"), Default::default());
                tx.transition(TransactionState::Failed);
                self.store.upsert(tx.clone());
                return;
            }
        }

        self.orchestrator.run(tx, &self.token).await;
        self.store.upsert(tx.clone());
        tracing::info!(id = %tx.id(), state = ?tx.state(), "transaction reached terminal state");
    }
}
