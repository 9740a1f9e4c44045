//! Builds an `axum::Router` from one listener's slice of the declarative
//! configuration: the concrete `BuildHandler(config) -> HTTPHandler`
//! contract named (but left opaque) in spec.md §1, specialized here to the
//! two reference application kinds `firelynx-config` defines.

use axum::body::Bytes;
use axum::http::StatusCode;
use axum::routing::{any, delete, get, head, options, patch, post, put, MethodRouter};
use axum::Router;

use firelynx_config::{AppConfig, Method, RuntimeConfig};

use crate::error::{ListenerError, Result};

/// Construct the router serving `listener_id`'s endpoints out of `config`.
/// Every route's application must resolve (spec.md §4.2 already rejected
/// dangling references at `created -> valid`, so a miss here means the
/// config changed between validation and prepare — still handled as an
/// error rather than a panic).
pub fn build_router(config: &RuntimeConfig, listener_id: &str) -> Result<Router> {
    let mut router = Router::new();

    for endpoint in config.endpoints_for(listener_id) {
        for route in &endpoint.routes {
            let app = config.application(&route.app).ok_or_else(|| ListenerError::UnknownApplication {
                endpoint: endpoint.id.clone(),
                app: route.app.clone(),
            })?;
            let method_router = method_router_for(&app.app, route.method);
            router = router.route(&route.path, method_router);
        }
    }

    Ok(router)
}

/// The concrete handler for one reference application kind. A real
/// deployment would dispatch to whatever `BuildHandler` its app types
/// register; here the two kinds `firelynx-config` ships are enough to
/// exercise the rollout engine end-to-end (spec.md §8, S1).
fn method_router_for(app: &AppConfig, method: Method) -> MethodRouter {
    let app = app.clone();
    let handler = move |body: Bytes| {
        let app = app.clone();
        async move {
            match app {
                AppConfig::Echo { status } => {
                    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
                    (code, body)
                }
                AppConfig::Static { status, body: text } => {
                    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
                    (code, Bytes::from(text))
                }
            }
        }
    };
    match method {
        Method::Any => any(handler),
        Method::Get => get(handler),
        Method::Post => post(handler),
        Method::Put => put(handler),
        Method::Patch => patch(handler),
        Method::Delete => delete(handler),
        Method::Head => head(handler),
        Method::Options => options(handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use firelynx_config::{ApplicationConfig, EndpointConfig, ListenerConfig, RouteConfig};
    use tower::ServiceExt;

    fn config() -> RuntimeConfig {
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

    #[tokio::test]
    async fn echo_route_returns_configured_status() {
        let router = build_router(&config(), "l1").unwrap();
        let response = router
            .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_application_reference_is_an_error() {
        let mut cfg = config();
        cfg.endpoints[0].routes[0].app = "missing".into();
        let err = build_router(&cfg, "l1").unwrap_err();
        assert!(matches!(err, ListenerError::UnknownApplication { .. }));
    }
}
