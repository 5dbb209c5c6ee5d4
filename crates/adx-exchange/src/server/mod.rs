mod health;
mod metrics;

pub use metrics::ServerMetrics;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{debug, error};

use adx_types::BidResponse;

use crate::core::broadcast::Broadcaster;
use crate::core::ctx::BidRequestCtx;
use crate::core::pipeline::Pipeline;
use crate::error::AdxError;
use crate::index_manager::IndexManager;
use crate::sspadapter::{resolve_ssp_id, AdapterRegistry};

#[derive(Clone)]
pub struct AppState {
    pub adapters: Arc<AdapterRegistry>,
    pub manager: Arc<IndexManager>,
    pub pipeline: Arc<Pipeline>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: Arc<ServerMetrics>,
    pub live: Arc<AtomicBool>,
    pub started_at: Instant,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/bid/rtb/v1", post(handle_bid))
        .route("/bid/:ssp_tag", post(handle_bid_tagged))
        .route("/health", get(health::health_handler))
        .route("/health/live", get(health::live_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_text())
}

async fn handle_bid(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    process_bid(state, None, params, headers, body).await
}

async fn handle_bid_tagged(
    State(state): State<AppState>,
    Path(ssp_tag): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    process_bid(state, Some(ssp_tag), params, headers, body).await
}

async fn process_bid(
    state: AppState,
    path_tag: Option<String>,
    params: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.inc_request();

    let header_id = headers
        .get("X-SSP-ID")
        .and_then(|v| v.to_str().ok());
    let ssp_id = resolve_ssp_id(
        params.get("sspid").map(String::as_str),
        header_id,
        params.get("ssid").map(String::as_str),
        path_tag.as_deref(),
    );

    let Some(ssp_id) = ssp_id else {
        state.metrics.inc_bad_request();
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing SSP id",
            "provide the sspid query parameter or X-SSP-ID header",
        );
    };

    let (adapter, ssp_config) = match state.adapters.get(&ssp_id) {
        Ok(pair) => pair,
        Err(e) => {
            state.metrics.inc_bad_request();
            return error_response(StatusCode::BAD_REQUEST, "invalid SSP configuration", &e.to_string());
        }
    };

    let request = match adapter.decode(&body) {
        Ok(r) => r,
        Err(e) => {
            state.metrics.inc_bad_request();
            return error_response(StatusCode::BAD_REQUEST, "failed to parse bid request", &e.to_string());
        }
    };

    let mut ctx = BidRequestCtx::new(request, ssp_config);
    if let Err(e) = state.pipeline.run(&mut ctx).await {
        return match e {
            AdxError::BadRequest(details) => {
                state.metrics.inc_bad_request();
                error_response(StatusCode::BAD_REQUEST, "invalid bid request", &details)
            }
            other => {
                state.metrics.inc_internal_error();
                error!(request = %ctx.request.id, "pipeline error: {other}");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to process bid request",
                    &other.to_string(),
                )
            }
        };
    }

    state.metrics.record_broadcast_latency(ctx.elapsed());
    state
        .metrics
        .record_bidder_outcomes(ctx.bidder_successes as u64, ctx.bidder_failures as u64);

    debug!(
        request = %ctx.request.id,
        ssp = %ctx.ssp_id,
        stages = ?ctx.stages,
        soft_errors = ctx.soft_errors.len(),
        "bid request processed"
    );

    let response = ctx
        .response
        .take()
        .unwrap_or_else(|| BidResponse::empty(&ctx.request.id));
    if response.is_no_bid() {
        state.metrics.inc_no_bid();
    } else {
        state.metrics.inc_bid();
    }

    match adapter.encode(&response) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            state.metrics.inc_internal_error();
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to format response",
                &e.to_string(),
            )
        }
    }
}

fn error_response(status: StatusCode, error: &str, details: &str) -> Response {
    (status, Json(json!({ "error": error, "details": details }))).into_response()
}
