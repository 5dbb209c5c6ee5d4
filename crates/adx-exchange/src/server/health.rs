use std::sync::atomic::Ordering;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde_json::json;

use crate::server::AppState;

/// Aggregate health with a per-component breakdown.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let manager = state.manager.metrics();
    let (healthy_bidders, unhealthy_bidders) = state.broadcaster.health().healthy_count();
    let open_circuits = state.broadcaster.breakers().open_count();

    let components = json!({
        "index": {
            "status": component_status(manager.indexed_docs > 0 || manager.scan_count > 0),
            "indexed_docs": manager.indexed_docs,
            "scan_count": manager.scan_count,
            "scan_errors": manager.error_count,
            "last_scan_unix_ms": manager.last_scan_unix_ms,
        },
        "bidders": {
            "status": component_status(true),
            "registered": manager.registered_bidders,
            "healthy": healthy_bidders,
            "unhealthy": unhealthy_bidders,
            "open_circuits": open_circuits,
        },
        "ssps": {
            "status": component_status(state.adapters.count() > 0),
            "configured": state.adapters.count(),
        },
        "counters": manager.cache,
    });

    let healthy = state.live.load(Ordering::Relaxed) && state.adapters.count() > 0;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": Utc::now(),
            "uptime_secs": state.started_at.elapsed().as_secs(),
            "components": components,
        })),
    )
}

/// Liveness: the in-process flag only.
pub async fn live_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.live.load(Ordering::Relaxed) {
        (
            StatusCode::OK,
            Json(json!({ "status": "alive", "timestamp": Utc::now() })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "dead", "timestamp": Utc::now() })),
        )
    }
}

/// Readiness: SSPs loaded, bidders registered, config loaded.
pub async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ssps_ready = state.adapters.count() > 0;
    let bidders_ready = state.manager.registry().count() > 0;
    let config_loaded = true; // reaching here means config parsed at boot

    let ready = ssps_ready && bidders_ready && config_loaded;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "timestamp": Utc::now(),
            "checks": {
                "ssps_ready": ssps_ready,
                "bidders_ready": bidders_ready,
                "config_loaded": config_loaded,
            },
        })),
    )
}

fn component_status(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "unhealthy"
    }
}
