//! Merges N producer transaction streams into a single serialized stream
//! (spec.md §4.1).

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::transaction::Transaction;

/// A channel capacity of 1 is the closest approximation of an unbuffered
/// (rendezvous) send available on `tokio::sync::mpsc`, which requires a
/// capacity of at least one. Spec.md §4.1 calls for "no buffered sending";
/// this keeps at most one in-flight item per producer queued downstream.
const OUTPUT_CAPACITY: usize = 1;

/// What a producer hands `FanIn::new`: its name (for logging) and the
/// receiving half of the channel it sends transactions into. The producer
/// retains the sending half and is responsible for closing it.
pub struct ProducerHandle<C> {
    pub name: String,
    pub receiver: mpsc::Receiver<Transaction<C>>,
}

/// Merges any number of producer streams into one. See spec.md §4.1 for the
/// full contract: exactly-once delivery, correct closure on either every
/// producer closing or the context cancelling, and a single-producer
/// passthrough fast path.
pub struct FanIn<C> {
    output: Arc<AsyncMutex<mpsc::Receiver<Transaction<C>>>>,
    supervisor: Option<JoinHandle<()>>,
}

impl<C: Send + 'static> FanIn<C> {
    /// # Panics
    /// If `producers` is empty — constructing a `FanIn` with no producers is
    /// a caller bug, not a recoverable runtime condition.
    pub fn new(token: CancellationToken, producers: Vec<ProducerHandle<C>>) -> Self {
        assert!(!producers.is_empty(), "FanIn requires at least one producer");

        if producers.len() == 1 {
            let only = producers.into_iter().next().unwrap();
            return Self {
                output: Arc::new(AsyncMutex::new(only.receiver)),
                supervisor: None,
            };
        }

        let (tx, rx) = mpsc::channel(OUTPUT_CAPACITY);
        let mut workers = JoinSet::new();
        for producer in producers {
            let out = tx.clone();
            let token = token.clone();
            let name = producer.name;
            workers.spawn(Self::pump(name, producer.receiver, out, token));
        }
        // Drop our own clone: the channel closes once every spawned worker's
        // clone is dropped, i.e. once every worker has exited.
        drop(tx);

        let supervisor = tokio::spawn(async move { while workers.join_next().await.is_some() {} });

        Self {
            output: Arc::new(AsyncMutex::new(rx)),
            supervisor: Some(supervisor),
        }
    }

    async fn pump(
        name: String,
        mut input: mpsc::Receiver<Transaction<C>>,
        output: mpsc::Sender<Transaction<C>>,
        token: CancellationToken,
    ) {
        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(producer = %name, "fan-in worker stopping: cancelled");
                    return;
                }
                item = input.recv() => item,
            };
            let Some(item) = item else {
                tracing::debug!(producer = %name, "fan-in worker stopping: producer closed");
                return;
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(producer = %name, "fan-in worker dropping in-flight item: cancelled");
                    return;
                }
                res = output.send(item) => {
                    if res.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// The (idempotent) output stream handle: every call returns the same
    /// underlying receiver, wrapped for shared, serialized access.
    pub fn output(&self) -> Arc<AsyncMutex<mpsc::Receiver<Transaction<C>>>> {
        self.output.clone()
    }

    /// Await the worker supervisor. Used by tests to assert no workers are
    /// left running after shutdown; a no-op in the single-producer fast path.
    pub async fn join(self) {
        if let Some(h) = self.supervisor {
            let _ = h.await;
        }
    }
}
