//! Entity endpoints

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::{Entity, EntityFilter};

use super::{page_limit, parse_param};

#[derive(Debug, Deserialize)]
pub struct EntityQuery {
    #[serde(rename = "type")]
    entity_type: Option<String>,
    status: Option<String>,
    name: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// GET /api/v1/entities
pub async fn list_entities(
    State(state): State<ApiState>,
    query: Result<Query<EntityQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;

    let filter = EntityFilter {
        entity_type: query.entity_type,
        status: parse_param(query.status.as_deref())?,
        name: query.name,
        limit: Some(page_limit(query.limit)),
        offset: query.offset,
    };

    let entities = state.store.list_entities(filter).await?;

    Ok(Json(json!({
        "count": entities.len(),
        "entities": entities,
    })))
}

/// GET /api/v1/entities/:id
pub async fn get_entity(State(state): State<ApiState>, Path(id): Path<i64>) -> ApiResult<Json<Entity>> {
    Ok(Json(state.store.get_entity(id).await?))
}

/// GET /api/v1/entities/by-name/:type/:name
pub async fn get_entity_by_name(
    State(state): State<ApiState>,
    Path((entity_type, name)): Path<(String, String)>,
) -> ApiResult<Json<Entity>> {
    Ok(Json(state.store.get_entity_by_name(&entity_type, &name).await?))
}
