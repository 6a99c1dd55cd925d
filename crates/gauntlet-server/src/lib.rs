//! HTTP surface for the gauntlet gateway.
//!
//! Exposes `POST /chat`, `GET /health`, an optional Prometheus-style
//! `GET /metrics`, and the read-only `/admin/*` endpoints. Transport-level
//! failures (bad JSON, wrong content type) are 4xx and never enter the
//! pipeline; everything the pipeline decides ships as 200 with the verdict
//! in the body.

pub mod client_ip;
pub mod handlers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use gauntlet_core::{ContactInbox, Orchestrator, RequestLog};
use gauntlet_types::GatewayConfig;

/// Request counters and latency aggregates for the metrics endpoint.
#[derive(Default)]
pub struct Metrics {
    pub requests_ok: AtomicU64,
    pub requests_refused: AtomicU64,
    pub latency_ms_sum: AtomicU64,
    pub latency_count: AtomicU64,
}

impl Metrics {
    pub fn observe(&self, success: bool, latency_ms: u64) {
        if success {
            self.requests_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_refused.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_ms_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition.
    pub fn render(&self) -> String {
        format!(
            "# TYPE chat_requests_total counter\n\
             chat_requests_total{{outcome=\"ok\"}} {}\n\
             chat_requests_total{{outcome=\"refused\"}} {}\n\
             # TYPE chat_request_latency_ms summary\n\
             chat_request_latency_ms_sum {}\n\
             chat_request_latency_ms_count {}\n",
            self.requests_ok.load(Ordering::Relaxed),
            self.requests_refused.load(Ordering::Relaxed),
            self.latency_ms_sum.load(Ordering::Relaxed),
            self.latency_count.load(Ordering::Relaxed),
        )
    }
}

/// Shared state accessible by all handlers.
#[derive(Clone)]
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub inbox: Arc<ContactInbox>,
    pub reqlog: Arc<RequestLog>,
    pub config: Arc<GatewayConfig>,
    pub started: Instant,
    /// Result of the most recent backend probe, updated by the maintenance
    /// task.
    pub models_healthy: Arc<AtomicBool>,
    pub metrics: Arc<Metrics>,
}

/// Build the router with all routes and layers.
pub fn build_router(state: ServerState) -> Router {
    let cors = if state.config.server.cors_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<axum::http::HeaderValue> = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/admin/inbox", get(handlers::inbox_list))
        .route("/admin/inbox/{id}", get(handlers::inbox_get))
        .route("/admin/analytics/summary", get(handlers::analytics_summary))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
