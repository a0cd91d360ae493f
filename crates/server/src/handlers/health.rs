//! Liveness endpoint.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metadata: &'static str,
    pub storage: &'static str,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated so orchestrators and load balancers can call it. Reports only
/// the backend kinds, never connection details.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Metadata store health check failed");
        ApiError::Unavailable("metadata store unreachable".to_string())
    })?;
    state.storage.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Object storage health check failed");
        ApiError::Unavailable("object storage unreachable".to_string())
    })?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        metadata: state.metadata.backend_name(),
        storage: state.storage.backend_name(),
    }))
}
