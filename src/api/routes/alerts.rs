//! Alert endpoints

use axum::{
    Json,
    extract::{Path, State},
};
use serde_json::{Value, json};

use crate::alerts::Alert;
use crate::api::{error::ApiResult, state::ApiState};

/// GET /api/v1/alerts
///
/// Active alerts, including acknowledged and suppressed ones
pub async fn list_active(State(state): State<ApiState>) -> Json<Value> {
    let alerts = state.alerts.active_alerts().await;
    Json(json!({
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

/// GET /api/v1/alerts/history
pub async fn list_history(State(state): State<ApiState>) -> Json<Value> {
    let alerts = state.alerts.history().await;
    Json(json!({
        "count": alerts.len(),
        "alerts": alerts,
    }))
}

/// GET /api/v1/alerts/:id
pub async fn get_alert(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.get_alert(&id).await?))
}

/// POST /api/v1/alerts/:id/acknowledge
pub async fn acknowledge(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.acknowledge(&id).await?))
}

/// POST /api/v1/alerts/:id/resolve
pub async fn resolve(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult<Json<Alert>> {
    Ok(Json(state.alerts.resolve(&id).await?))
}
