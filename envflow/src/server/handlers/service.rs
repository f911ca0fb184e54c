//! Service handlers

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use openapi_server::models::{HealthResponse, VersionResponse};

use crate::server::state::ServerState;
use crate::utils::version_info;

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let version = version_info();
    let records = state
        .store
        .counts()
        .await
        .into_iter()
        .map(|(kind, count)| (kind.to_string(), count))
        .collect();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "envflow".to_string(),
        version: version.version,
        records,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}
