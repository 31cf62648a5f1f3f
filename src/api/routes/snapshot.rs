use axum::{Json, extract::State};

use crate::api::state::ApiState;
use crate::snapshot::Snapshot;

/// GET /api/v1/snapshot
pub async fn get_snapshot(State(state): State<ApiState>) -> Json<Snapshot> {
    Json(state.snapshot.get().await)
}
