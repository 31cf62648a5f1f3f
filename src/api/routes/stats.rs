//! Database statistics endpoint

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::{error::ApiResult, state::ApiState};

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<ApiState>) -> ApiResult<Json<Value>> {
    let database = state.store.get_database_info().await?;
    let active_alerts = state.alerts.active_alerts().await.len();

    Ok(Json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "database": database,
        "active_alerts": active_alerts,
    })))
}
