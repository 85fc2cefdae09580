// WebSocket edge gateway: authenticates and gates connections, validates
// and sanitizes inbound messages, enforces per-user rate limits, negotiates
// permessage-deflate, and records connection/message/error metrics before
// handing validated traffic to the business layer.

pub mod auth;
pub mod compress;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod ratelimit;
pub mod store;
pub mod validate;
pub mod ws;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::{error, info, warn};

use crate::auth::{
    gate::ConnectionGate,
    jwt::IdentityTokenService,
    permissions::{PermissionBackend, PermissionChecker, ProjectDirectory},
};
use crate::config::GatewayConfig;
use crate::error::{attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope};
use crate::metrics::MetricsCollector;
use crate::pipeline::MessagePipeline;
use crate::ratelimit::{RateCounterStore, RateLimiter};
use crate::store::TtlStore;
use crate::ws::{registry::ConnectionRegistry, Dispatcher};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Everything the HTTP and WebSocket handlers need, cheap to clone.
#[derive(Clone)]
pub struct GatewayState {
    pub tokens: Arc<IdentityTokenService>,
    pub gate: ConnectionGate,
    pub pipeline: Arc<MessagePipeline>,
    pub metrics: Arc<MetricsCollector>,
    pub registry: ConnectionRegistry,
    pub dispatcher: Dispatcher,
}

impl GatewayState {
    /// Wire the full state graph from configuration with in-memory
    /// backends. The business layer swaps in its own dispatcher and
    /// permission data at deployment time.
    pub fn from_config(config: &GatewayConfig, dispatcher: Dispatcher) -> anyhow::Result<Self> {
        if config.is_dev_auth_secret() {
            warn!("using the development auth secret, do not deploy this configuration");
        }

        let tokens = Arc::new(IdentityTokenService::new(&config.auth_secret)?);
        let gate = ConnectionGate::new(config.allowed_origins.clone());
        let metrics = Arc::new(MetricsCollector::new(TtlStore::memory()));
        let rate_limiter = Arc::new(RateLimiter::new(
            RateCounterStore::memory(),
            config.rate_limit_max_messages,
            config.rate_limit_window,
        ));
        let permission_checker =
            PermissionChecker::new(PermissionBackend::memory(), ProjectDirectory::memory());
        let pipeline = Arc::new(MessagePipeline::new(
            gate.clone(),
            rate_limiter,
            permission_checker,
            Arc::clone(&metrics),
            None,
        ));

        Ok(Self {
            tokens,
            gate,
            pipeline,
            metrics,
            registry: ConnectionRegistry::default(),
            dispatcher,
        })
    }
}

pub fn build_router(state: GatewayState, allowed_origins: &[String]) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/v1/metrics/summary", get(metrics_summary).with_state(state.clone()))
            .merge(ws::handler::router(state)),
        allowed_origins,
    )
}

fn apply_middleware(router: Router, allowed_origins: &[String]) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
        .layer(cors::cors_layer(allowed_origins))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_summary(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(state.metrics.summary())
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = std::time::Instant::now();

    let mut response =
        with_request_id_scope(request_id.clone(), async move { next.run(request).await }).await;

    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        routing::get,
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{apply_middleware, build_router, GatewayState};
    use crate::{config::GatewayConfig, ws::Dispatcher};

    fn test_router() -> Router {
        let config = GatewayConfig::from_env_fn(|_| Err(std::env::VarError::NotPresent));
        let state = GatewayState::from_config(&config, Dispatcher::Sink)
            .expect("state should build from dev config");
        build_router(state, &config.allowed_origins)
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn metrics_summary_serves_the_collector_snapshot() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/v1/metrics/summary")
                    .body(Body::empty())
                    .expect("summary request should build"),
            )
            .await
            .expect("summary request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("summary body should be readable");
        let parsed: Value =
            serde_json::from_slice(&body).expect("summary body should be valid json");

        assert_eq!(parsed["connections"]["active"], 0);
        assert!(parsed["server_time"].is_string());
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let router = apply_middleware(Router::new().route("/panic", get(panic_route)), &[]);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should resolve to a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn upstream_request_id_is_echoed_back() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header("x-request-id", "req-upstream-42")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(
            response.headers().get("x-request-id").map(|v| v.to_str().ok()).flatten(),
            Some("req-upstream-42")
        );
    }
}
