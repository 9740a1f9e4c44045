//! Declarative configuration schema: listeners, endpoints, routes, and
//! applications.
//!
//! The core rollout engine treats this entire tree as opaque; only
//! `firelynx-listener` and the producers in this crate ever look inside it.

use std::collections::HashSet;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use firelynx_core::ConfigPayload;

/// HTTP method constraint on a route. `Any` matches every method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Any,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

/// The opaque application an endpoint routes to. Real deployments plug in
/// whatever `BuildHandler(config) -> HTTPHandler` types they need; this
/// schema carries the two reference kinds needed to exercise the rollout
/// engine end-to-end without pulling in a real app runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppConfig {
    /// Echoes the request body (or an empty body) back with the given
    /// status code.
    Echo { status: u16 },
    /// Always returns `status` with a fixed text body.
    Static { status: u16, body: String },
}

/// One route within an endpoint: a path prefix plus a method constraint,
/// naming the application that serves matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub path: String,
    #[serde(default = "default_method")]
    pub method: Method,
    pub app: String,
}

fn default_method() -> Method {
    Method::Any
}

/// A named application definition, referenced by `RouteConfig::app`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    #[serde(flatten)]
    pub app: AppConfig,
}

/// One endpoint: a named bundle of routes attached to a listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub listener_id: String,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

/// One listener: a bind address that the HTTP listener manager opens a
/// socket for (spec.md §4.3, "Tracks a mapping from listener id -> (bound
/// socket, active router)").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub id: String,
    pub bind_addr: SocketAddr,
    /// Graceful-drain deadline before forced close, in milliseconds
    /// (spec.md §4.3, "drain in-flight requests with a bounded deadline").
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
}

fn default_drain_deadline_ms() -> u64 {
    5_000
}

/// The full declarative configuration tree (spec.md §1/§3): one
/// transaction's payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub listeners: Vec<ListenerConfig>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub applications: Vec<ApplicationConfig>,
    /// Set by the file producer when the raw bytes it read could not even
    /// be parsed as TOML (spec.md §6, "Unparseable content emits a
    /// transaction nonetheless"). Never populated by [`RuntimeConfig`]'s own
    /// `Deserialize` impl — a parse failure never produces a value at all.
    #[serde(skip)]
    pub parse_error: Option<String>,
}

impl RuntimeConfig {
    /// A config payload that carries nothing but a parse failure, so the
    /// file producer can still hand the manager a `Transaction` to record
    /// (spec.md §6) even when the bytes it read were not valid TOML.
    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self {
            parse_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn endpoints_for(&self, listener_id: &str) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(move |e| e.listener_id == listener_id)
    }

    pub fn application(&self, name: &str) -> Option<&ApplicationConfig> {
        self.applications.iter().find(|a| a.name == name)
    }

    /// Structural and semantic validation (spec.md §4.2, "static validation
    /// (structural and semantic) of the config payload"). Every referential
    /// constraint a downstream participant would otherwise discover at
    /// `Prepare` time is checked here instead, so bad config fails fast as
    /// `created -> failed` rather than burning a prepare attempt.
    pub fn validate_structural(&self) -> std::result::Result<(), String> {
        if let Some(parse_error) = &self.parse_error {
            return Err(format!("parse error: {parse_error}"));
        }

        let mut errors = Vec::new();

        let mut listener_ids = HashSet::new();
        for l in &self.listeners {
            if l.id.is_empty() {
                errors.push("listener id must not be empty".to_string());
            }
            if !listener_ids.insert(l.id.as_str()) {
                errors.push(format!("duplicate listener id {:?}", l.id));
            }
        }

        let mut app_names = HashSet::new();
        for a in &self.applications {
            if !app_names.insert(a.name.as_str()) {
                errors.push(format!("duplicate application name {:?}", a.name));
            }
            match &a.app {
                AppConfig::Echo { status } | AppConfig::Static { status, .. } => {
                    if !(100..1000).contains(status) {
                        errors.push(format!("application {:?} has invalid status {status}", a.name));
                    }
                }
            }
        }

        let mut endpoint_ids = HashSet::new();
        for e in &self.endpoints {
            if !endpoint_ids.insert(e.id.as_str()) {
                errors.push(format!("duplicate endpoint id {:?}", e.id));
            }
            if !listener_ids.contains(e.listener_id.as_str()) {
                errors.push(format!(
                    "endpoint {:?} references unknown listener {:?}",
                    e.id, e.listener_id
                ));
            }
            if e.routes.is_empty() {
                errors.push(format!("endpoint {:?} has no routes", e.id));
            }
            for r in &e.routes {
                if !app_names.contains(r.app.as_str()) {
                    errors.push(format!(
                        "route {} in endpoint {:?} references unknown application {:?}",
                        r.path, e.id, r.app
                    ));
                }
                if !r.path.starts_with('/') {
                    errors.push(format!("route path {:?} must start with '/'", r.path));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

impl ConfigPayload for RuntimeConfig {
    fn validate(&self) -> std::result::Result<(), String> {
        self.validate_structural()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid() -> RuntimeConfig {
        RuntimeConfig {
            listeners: vec![ListenerConfig {
                id: "l1".into(),
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                drain_deadline_ms: 1000,
            }],
            applications: vec![ApplicationConfig {
                name: "echo".into(),
                app: AppConfig::Echo { status: 200 },
            }],
            endpoints: vec![EndpointConfig {
                id: "e1".into(),
                listener_id: "l1".into(),
                routes: vec![RouteConfig {
                    path: "/echo".into(),
                    method: Method::Any,
                    app: "echo".into(),
                }],
            }],
            parse_error: None,
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal_valid().validate().is_ok());
    }

    #[test]
    fn dangling_listener_reference_is_rejected() {
        let mut cfg = minimal_valid();
        cfg.endpoints[0].listener_id = "does-not-exist".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("unknown listener"));
    }

    #[test]
    fn dangling_app_reference_is_rejected() {
        let mut cfg = minimal_valid();
        cfg.endpoints[0].routes[0].app = "missing".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("unknown application"));
    }

    #[test]
    fn duplicate_listener_ids_are_rejected() {
        let mut cfg = minimal_valid();
        let dup = cfg.listeners[0].clone();
        cfg.listeners.push(dup);
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("duplicate listener id"));
    }
}
