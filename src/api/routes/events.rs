//! Event endpoints

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::{Event, EventFilter};

use super::{page_limit, parse_param};

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    entity_id: Option<i64>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    severity: Option<String>,
    /// ISO 8601, inclusive
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// GET /api/v1/events
///
/// Newest first
pub async fn list_events(
    State(state): State<ApiState>,
    query: Result<Query<EventQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;

    let filter = EventFilter {
        entity_id: query.entity_id,
        event_type: query.event_type,
        severity: parse_param(query.severity.as_deref())?,
        since: query.since,
        until: query.until,
        limit: Some(page_limit(query.limit)),
        offset: query.offset,
    };

    let events = state.store.list_events(filter).await?;

    Ok(Json(json!({
        "count": events.len(),
        "events": events,
    })))
}

/// GET /api/v1/events/:id
pub async fn get_event(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<Json<Event>> {
    Ok(Json(state.store.get_event(id).await?))
}
