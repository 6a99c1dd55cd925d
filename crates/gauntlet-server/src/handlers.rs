//! HTTP request handlers.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use gauntlet_core::orchestrator::InboundRequest;
use gauntlet_types::envelope::ChatRequest;

use crate::client_ip::{hash_ip, resolve_client_ip};
use crate::ServerState;

/// Whether the declared content type is JSON (charset parameters allowed).
fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .eq_ignore_ascii_case("application/json")
        })
        .unwrap_or(false)
}

/// `POST /chat` -- run the pipeline.
///
/// Transport errors are 4xx here; everything past body parsing is a 200
/// whose body carries the pipeline verdict.
pub async fn chat(
    State(state): State<ServerState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if !content_type_is_json(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "expected application/json").into_response();
    }

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return (StatusCode::BAD_REQUEST, "malformed JSON body").into_response(),
    };

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let client_ip = resolve_client_ip(peer.ip(), forwarded, &state.config.server);
    let ip_hash = hash_ip(client_ip, &state.config.server.ip_hash_salt);

    let inbound = InboundRequest {
        message: request.message,
        conversation_id: request.conversation_id,
        ip_hash,
        body_size: Some(body.len()),
    };

    let response = state.orchestrator.process(inbound).await;
    state
        .metrics
        .observe(response.success, response.metadata.response_time_ms);

    Json(response).into_response()
}

/// `GET /health`.
pub async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let models_loaded = state.models_healthy.load(Ordering::Relaxed);
    let status = if models_loaded { "healthy" } else { "degraded" };
    Json(serde_json::json!({
        "status": status,
        "models_loaded": models_loaded,
        "uptime_seconds": state.started.elapsed().as_secs(),
    }))
}

/// `GET /metrics` -- Prometheus text, only when enabled.
pub async fn metrics(State(state): State<ServerState>) -> Response {
    if !state.config.server.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct InboxQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /admin/inbox?limit=N`.
pub async fn inbox_list(
    State(state): State<ServerState>,
    Query(query): Query<InboxQuery>,
) -> Json<serde_json::Value> {
    let messages = state.inbox.list_recent(query.limit.min(500));
    Json(serde_json::json!({
        "count": state.inbox.count(),
        "messages": messages,
    }))
}

/// `GET /admin/inbox/{id}`.
pub async fn inbox_get(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Response {
    match state.inbox.get(&id) {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `GET /admin/analytics/summary` -- aggregates over the recent-request
/// ring.
pub async fn analytics_summary(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let records = state.reqlog.recent();
    let summary = summarize(&records);
    info!(records = records.len(), "analytics summary served");
    Json(summary)
}

/// Aggregate recent request records into the summary payload.
fn summarize(records: &[gauntlet_core::RequestRecord]) -> serde_json::Value {
    use std::collections::BTreeMap;

    let total = records.len();
    let blocked = records.iter().filter(|r| r.blocked_at_layer.is_some()).count();

    let mut by_domain: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_blocked_layer: BTreeMap<&str, usize> = BTreeMap::new();
    let mut latency_sum = 0u64;

    for record in records {
        if let Some(domain) = record.domain_matched.as_deref() {
            *by_domain.entry(domain).or_default() += 1;
        }
        if let Some(layer) = record.blocked_at_layer.as_deref() {
            *by_blocked_layer.entry(layer).or_default() += 1;
        }
        latency_sum += record.response_time_ms;
    }

    let avg_latency_ms = if total > 0 {
        latency_sum / total as u64
    } else {
        0
    };

    serde_json::json!({
        "total_requests": total,
        "blocked_requests": blocked,
        "requests_by_domain": by_domain,
        "blocked_by_layer": by_blocked_layer,
        "avg_response_time_ms": avg_latency_ms,
    })
}
