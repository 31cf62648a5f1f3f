//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode};

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::SystemHealth;

/// GET /api/v1/health
///
/// Store health snapshot; answers 503 while the store is unhealthy
pub async fn health_check(State(state): State<ApiState>) -> ApiResult<(StatusCode, Json<SystemHealth>)> {
    let health = state.store.get_system_health().await?;
    let status = if health.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(health)))
}
