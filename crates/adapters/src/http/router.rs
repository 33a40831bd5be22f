use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;

/// Maximum request body size for API endpoints (64 KiB).
const MAX_BODY_SIZE: usize = 64 * 1024;

use super::health_handler::healthz;
use super::metrics_handler::metrics;
use super::middleware::auth::auth_middleware;
use super::proc_handler::{ip_vs, ip_vs_stats};
use super::state::AppState;
use super::status_handler::daemon_status;
use super::tunables_handler::{get_tunables, put_tunables};

/// Build the Axum router for the daemon's HTTP API.
///
/// Routes are split into three groups:
/// 1. **Public** (no auth): `/healthz`
/// 2. **Metrics** (conditional auth): `/metrics`
/// 3. **API** (protected): `/api/v1/*` and the `/proc` reports
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new().route("/healthz", get(healthz));

    let metrics_routes = {
        let r = Router::new().route("/metrics", get(metrics));
        if state.auth_provider.is_some() && state.metrics_auth_required {
            r.layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                auth_middleware,
            ))
        } else {
            r
        }
    };

    let api_routes = {
        let r = Router::new()
            .route("/api/v1/status", get(daemon_status))
            .route("/api/v1/tunables", get(get_tunables).put(put_tunables))
            .route("/proc/ip_vs", get(ip_vs))
            .route("/proc/ip_vs_stats", get(ip_vs_stats))
            .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

        if state.auth_provider.is_some() {
            r.layer(middleware::from_fn_with_state(
                Arc::clone(&state),
                auth_middleware,
            ))
        } else {
            r
        }
    };

    public_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use domain::auth::rbac::Role;
    use ports::secondary::auth_provider::AuthProvider;
    use tower::ServiceExt;

    use crate::auth::api_key_provider::ApiKeyAuthProvider;
    use crate::http::state::tests::make_state;

    fn make_authed(metrics_auth_required: bool) -> Router {
        let provider: Arc<dyn AuthProvider> = Arc::new(ApiKeyAuthProvider::new(vec![
            ("ops".to_string(), "admin-key".to_string(), Role::Admin),
            ("grafana".to_string(), "viewer-key".to_string(), Role::Viewer),
        ]));
        build_router(Arc::new(
            make_state().with_auth_provider(provider, metrics_auth_required),
        ))
    }

    async fn status_of(app: Router, req: Request<Body>) -> StatusCode {
        app.oneshot(req).await.unwrap().status()
    }

    fn get_with(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(key) = key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn open_router_serves_everything() {
        let app = build_router(Arc::new(make_state()));
        for uri in ["/healthz", "/metrics", "/api/v1/status", "/api/v1/tunables", "/proc/ip_vs"] {
            assert_eq!(status_of(app.clone(), get_with(uri, None)).await, StatusCode::OK, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = build_router(Arc::new(make_state()));
        assert_eq!(
            status_of(app, get_with("/api/v1/nope", None)).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn api_requires_key_when_configured() {
        let app = make_authed(false);
        assert_eq!(
            status_of(app.clone(), get_with("/api/v1/status", None)).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(app.clone(), get_with("/proc/ip_vs_stats", Some("wrong"))).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(app.clone(), get_with("/api/v1/status", Some("viewer-key"))).await,
            StatusCode::OK
        );
        // Probes and metrics stay open.
        assert_eq!(status_of(app.clone(), get_with("/healthz", None)).await, StatusCode::OK);
        assert_eq!(status_of(app, get_with("/metrics", None)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_auth_when_required() {
        let app = make_authed(true);
        assert_eq!(
            status_of(app.clone(), get_with("/metrics", None)).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(app, get_with("/metrics", Some("viewer-key"))).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn viewer_cannot_put_tunables() {
        let app = make_authed(false);
        let put = |key: &str| {
            Request::put("/api/v1/tunables")
                .header("authorization", format!("Bearer {key}"))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"cache_bypass":true}"#))
                .unwrap()
        };
        assert_eq!(status_of(app.clone(), put("viewer-key")).await, StatusCode::FORBIDDEN);
        assert_eq!(status_of(app, put("admin-key")).await, StatusCode::OK);
    }
}
