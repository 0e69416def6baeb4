//! Health check endpoints.
//!
//! `/health` only says the process is up. `/readyz` reports pool capacity and
//! turns unavailable once neither pool can serve another server.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "orchestrator";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Pool capacity (readiness only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pools: Option<PoolHealth>,
}

/// Free capacity of each pool.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PoolHealth {
    pub ip_available: u64,
    pub port_available: u64,
    pub templates: usize,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        pools: None,
    })
}

/// Returns 503 when both pools are exhausted.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let usage = state.provisioner().pool_usage();
    let ready = !(usage.ip.is_exhausted() && usage.port.is_exhausted());

    let response = HealthResponse {
        status: if ready { "ok" } else { "degraded" }.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        pools: Some(PoolHealth {
            ip_available: usage.ip.available,
            port_available: usage.port.available,
            templates: state.provisioner().templates().len(),
        }),
    };

    if ready {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
