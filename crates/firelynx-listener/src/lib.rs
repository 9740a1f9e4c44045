//! The HTTP listener manager: the reference `Participant` implementation
//! for the firelynx configuration rollout engine (spec.md §4.3). Builds
//! `axum` routers from `firelynx-config`'s declarative schema and hot-swaps
//! them with zero-downtime semantics.

pub mod error;
pub mod manager;
pub mod router;

pub use error::{ListenerError, Result};
pub use manager::ListenerManager;
pub use router::build_router;
