//! Error types for the HTTP listener manager.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("route in endpoint {endpoint:?} references unknown application {app:?}")]
    UnknownApplication { endpoint: String, app: String },

    #[error("failed to bind listener {id} on {addr}: {source}")]
    Bind {
        id: String,
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ListenerError>;
