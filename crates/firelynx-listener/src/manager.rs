//! The HTTP listener manager: the reference [`Participant`] implementation
//! (spec.md §4.3). Tracks a mapping from listener id to (bound socket,
//! active router) and hot-swaps both with zero-downtime semantics.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::extract::Request;
use axum::Router;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use firelynx_config::RuntimeConfig;
use firelynx_core::{Participant, ParticipantFailure, Transaction, TransactionId};

use crate::error::ListenerError;
use crate::router::build_router;

/// A listener this manager is currently serving traffic on.
struct LiveListener {
    bind_addr: SocketAddr,
    drain_deadline: Duration,
    router: Arc<ArcSwap<Router>>,
    shutdown: CancellationToken,
    serve_task: JoinHandle<()>,
}

/// What `Prepare` staged for one listener within one transaction.
struct StagedListener {
    id: String,
    bind_addr: SocketAddr,
    drain_deadline: Duration,
    router: Router,
    /// `Some` when this listener is new or its bind address changed: the
    /// socket is already bound (but not yet serving) as of `Prepare`
    /// (spec.md §4.3, "bind new sockets now — still not serving").
    socket: Option<TcpListener>,
}

/// What `Commit` did to one listener, so `Compensate` knows how to undo it.
enum PreviousState {
    /// The listener already existed; this is what was active before
    /// `Commit` swapped it in.
    RouterSwapped(Arc<Router>),
    /// The listener was brand new; `Commit` started serving it.
    NewlyStarted,
    /// The listener was dropped from the new config; `Commit` began
    /// draining it in the background. Once a drain has started it cannot
    /// be reversed — see `compensate`'s handling of this variant.
    Removed,
    /// The listener kept its id but its bind address changed; `Commit`
    /// started serving the newly-bound socket and began draining the old
    /// one in the background. Like `Removed`, a drain already started
    /// cannot be reversed.
    Rebound,
}

/// Everything `Prepare` staged for one transaction, consumed by `Commit`
/// and/or `Compensate`.
struct StagedChange {
    upserts: Vec<StagedListener>,
    removed: Vec<String>,
    previous: HashMap<String, PreviousState>,
    committed: bool,
}

/// The reference `Participant` implementation: owns every listening socket
/// and router, and performs the atomic swap described in spec.md §4.3/§9.
pub struct ListenerManager {
    name: String,
    live: DashMap<String, LiveListener>,
    staged: DashMap<TransactionId, StagedChange>,
}

impl ListenerManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            live: DashMap::new(),
            staged: DashMap::new(),
        }
    }

    /// The address actually bound for `listener_id`, resolved after an
    /// ephemeral (`:0`) port is assigned by the OS. `None` if the listener
    /// is not currently live.
    pub fn local_addr(&self, listener_id: &str) -> Option<SocketAddr> {
        self.live.get(listener_id).map(|l| l.bind_addr)
    }

    pub fn listener_ids(&self) -> Vec<String> {
        self.live.iter().map(|e| e.key().clone()).collect()
    }

    /// Drain and close every live listener, waiting up to each listener's
    /// own drain deadline. Used by process shutdown, not by the saga.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, live)) = self.live.remove(&id) {
                live.shutdown.cancel();
                let _ = tokio::time::timeout(live.drain_deadline, live.serve_task).await;
            }
        }
    }
}

#[async_trait]
impl Participant<RuntimeConfig> for ListenerManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn prepare(&self, tx: &Transaction<RuntimeConfig>, _token: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
        let config = tx.config();
        let mut upserts = Vec::with_capacity(config.listeners.len());

        for listener_cfg in &config.listeners {
            let router = build_router(config, &listener_cfg.id).map_err(|e| ParticipantFailure::new(e.to_string()))?;

            let needs_new_socket = match self.live.get(&listener_cfg.id) {
                Some(live) => live.bind_addr != listener_cfg.bind_addr,
                None => true,
            };

            // On bind failure we return immediately; `upserts` (and any
            // sockets it already holds from earlier iterations of this same
            // loop) is dropped with it, closing those sockets. This
            // participant reported failure, so the orchestrator will not
            // call `compensate` on it (spec.md §4.4) — cleanup must be
            // complete by the time this function returns.
            let socket = if needs_new_socket {
                Some(
                    TcpListener::bind(listener_cfg.bind_addr)
                        .await
                        .map_err(|source| ListenerError::Bind {
                            id: listener_cfg.id.clone(),
                            addr: listener_cfg.bind_addr,
                            source,
                        })
                        .map_err(|e| ParticipantFailure::new(e.to_string()))?,
                )
            } else {
                None
            };
            let bind_addr = match &socket {
                Some(s) => s.local_addr().unwrap_or(listener_cfg.bind_addr),
                None => listener_cfg.bind_addr,
            };

            upserts.push(StagedListener {
                id: listener_cfg.id.clone(),
                bind_addr,
                drain_deadline: Duration::from_millis(listener_cfg.drain_deadline_ms),
                router,
                socket,
            });
        }

        let new_ids: std::collections::HashSet<&str> = config.listeners.iter().map(|l| l.id.as_str()).collect();
        let removed: Vec<String> = self
            .live
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !new_ids.contains(id.as_str()))
            .collect();

        self.staged.insert(
            tx.id(),
            StagedChange {
                upserts,
                removed,
                previous: HashMap::new(),
                committed: false,
            },
        );

        Ok(())
    }

    async fn commit(&self, tx: &Transaction<RuntimeConfig>, _token: &CancellationToken) -> std::result::Result<(), ParticipantFailure> {
        let Some(mut entry) = self.staged.get_mut(&tx.id()) else {
            // Nothing was staged for this transaction (e.g. it never touched
            // listeners) — a no-op commit is a valid response (spec.md §4.3).
            return Ok(());
        };

        let upserts = std::mem::take(&mut entry.upserts);
        let removed = std::mem::take(&mut entry.removed);

        for staged in upserts {
            match staged.socket {
                Some(socket) => {
                    // Prepare bound a new socket for this id — either it is
                    // brand new, or its bind address changed (spec.md §4.3:
                    // "Start serving on newly bound sockets"). Either way,
                    // start serving it now, draining whatever was previously
                    // live under this id in the background.
                    let router = Arc::new(ArcSwap::from_pointee(staged.router));
                    let shutdown = CancellationToken::new();
                    let serve_task = spawn_server(socket, router.clone(), shutdown.clone());
                    let new_live = LiveListener {
                        bind_addr: staged.bind_addr,
                        drain_deadline: staged.drain_deadline,
                        router,
                        shutdown,
                        serve_task,
                    };
                    match self.live.remove(&staged.id) {
                        Some((_, old_live)) => {
                            old_live.shutdown.cancel();
                            let deadline = old_live.drain_deadline;
                            tokio::spawn(async move {
                                let _ = tokio::time::timeout(deadline, old_live.serve_task).await;
                            });
                            entry.previous.insert(staged.id.clone(), PreviousState::Rebound);
                        }
                        None => {
                            entry.previous.insert(staged.id.clone(), PreviousState::NewlyStarted);
                        }
                    }
                    self.live.insert(staged.id.clone(), new_live);
                }
                None => {
                    // Existing listener, same bind address: the only step
                    // that touches request dispatch is this single atomic
                    // reference store (spec.md §4.3/§9 — no lock held while
                    // serving).
                    if let Some(mut live) = self.live.get_mut(&staged.id) {
                        let previous = live.router.load_full();
                        live.router.store(Arc::new(staged.router));
                        live.drain_deadline = staged.drain_deadline;
                        entry.previous.insert(staged.id.clone(), PreviousState::RouterSwapped(previous));
                    }
                }
            }
        }

        for id in removed {
            if let Some((_, live)) = self.live.remove(&id) {
                live.shutdown.cancel();
                let deadline = live.drain_deadline;
                tokio::spawn(async move {
                    let _ = tokio::time::timeout(deadline, live.serve_task).await;
                });
                entry.previous.insert(id, PreviousState::Removed);
            }
        }

        entry.committed = true;
        Ok(())
    }

    async fn compensate(&self, tx: &Transaction<RuntimeConfig>) -> std::result::Result<(), ParticipantFailure> {
        let Some((_, staged)) = self.staged.remove(&tx.id()) else {
            return Ok(());
        };

        if !staged.committed {
            // Prepare succeeded but Commit never ran for this participant
            // (a different participant failed first). Nothing live was
            // touched; dropping `staged` here releases the sockets bound
            // during Prepare (spec.md §4.3, "close any newly-bound sockets
            // that had not yet started serving").
            tracing::debug!(participant = %self.name, tx = %tx.id(), "compensate: releasing staged sockets, commit never ran");
            return Ok(());
        }

        for (id, previous) in staged.previous {
            match previous {
                PreviousState::RouterSwapped(old_router) => {
                    if let Some(live) = self.live.get(&id) {
                        live.router.store(old_router);
                    }
                }
                PreviousState::NewlyStarted => {
                    if let Some((_, live)) = self.live.remove(&id) {
                        live.shutdown.cancel();
                        let _ = tokio::time::timeout(live.drain_deadline, live.serve_task).await;
                    }
                }
                PreviousState::Removed => {
                    // A drain already in flight cannot be un-started; this is
                    // a documented limitation (DESIGN.md), logged rather than
                    // silently swallowed so an operator can reapply.
                    tracing::warn!(
                        participant = %self.name,
                        tx = %tx.id(),
                        listener = %id,
                        "compensate: listener removal cannot be undone once its drain started"
                    );
                }
                PreviousState::Rebound => {
                    // The old socket for this id is already draining under
                    // the new bind address's serve task; there is no old
                    // listener left to swap back to (same limitation as
                    // `Removed`, documented in DESIGN.md).
                    tracing::warn!(
                        participant = %self.name,
                        tx = %tx.id(),
                        listener = %id,
                        "compensate: listener rebind cannot be undone once the old socket's drain started"
                    );
                }
            }
        }

        Ok(())
    }
}

fn spawn_server(socket: TcpListener, router: Arc<ArcSwap<Router>>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = dispatch_app(router);
        let serve = axum::serve(socket, app).with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "listener serve loop exited with an error");
        }
    })
}

/// The app actually handed to `axum::serve`: every request loads the
/// currently-active router once (spec.md §9, "request-dispatch readers
/// must snapshot the reference once per request") and forwards to it.
fn dispatch_app(current: Arc<ArcSwap<Router>>) -> Router {
    Router::new().fallback(move |req: Request| {
        let current = current.clone();
        async move {
            let router = (**current.load()).clone();
            match router.oneshot(req).await {
                Ok(response) => response,
                Err(never) => match never {},
            }
        }
    })
}
