//! The declarative configuration schema (listeners, endpoints, routes,
//! applications), its static validation, TOML loading, and the two
//! producers that feed the fan-in: a file watcher and an in-process stand-in
//! for the control-RPC service.

pub mod api_producer;
pub mod error;
pub mod file_producer;
pub mod loader;
pub mod schema;

pub use api_producer::{api_producer, ApiProducerHandle, ApplyRejected, ValidationResult};
pub use error::{ConfigError, Result};
pub use file_producer::FileProducer;
pub use schema::{AppConfig, ApplicationConfig, EndpointConfig, ListenerConfig, Method, RouteConfig, RuntimeConfig};
