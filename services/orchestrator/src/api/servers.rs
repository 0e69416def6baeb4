//! Server orchestration endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::api::error::ApiError;
use crate::provider::{Instance, ListFilter};
use crate::provision::{CreateServerRequest, PoolsUsage};
use crate::state::AppState;

/// Create server routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/servers", get(list_servers).post(create_server))
        .route("/servers/{id}", get(get_server).delete(delete_server))
        .route("/servers/{id}/restart", post(restart_server))
        .route("/pools", get(pools))
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

/// GET /orchestration/servers
async fn list_servers(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Instance>>, ApiError> {
    let servers = state.provisioner().list_servers(&filter).await?;
    Ok(Json(servers))
}

/// POST /orchestration/servers
async fn create_server(
    State(state): State<AppState>,
    body: Result<Json<CreateServerRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;

    if req.template.trim().is_empty() {
        return Err(ApiError::bad_request(
            "invalid_template",
            "template is required",
        ));
    }

    info!(template = %req.template, "Create server requested");
    let instance = state.provisioner().create_server(req).await?;

    Ok((StatusCode::CREATED, Json(instance)))
}

/// GET /orchestration/servers/{id}
async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Instance>, ApiError> {
    let instance = state.provisioner().get_server(&id).await?;
    Ok(Json(instance))
}

/// DELETE /orchestration/servers/{id}
async fn delete_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.provisioner().destroy_server(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /orchestration/servers/{id}/restart
async fn restart_server(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.provisioner().restart_server(&id).await?;
    Ok(Json(StatusResponse {
        status: "restarted",
    }))
}

/// GET /orchestration/pools
async fn pools(State(state): State<AppState>) -> Json<PoolsUsage> {
    Json(state.provisioner().pool_usage())
}
