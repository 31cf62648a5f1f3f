//! Metric endpoints

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::api::{error::ApiResult, state::ApiState};
use crate::storage::{MetricFilter, MetricSummary};

use super::{page_limit, parse_param};

/// Query parameters shared by the list and summary endpoints
#[derive(Debug, Deserialize)]
pub struct MetricQuery {
    entity_id: Option<i64>,
    name: Option<String>,
    aggregation_level: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl MetricQuery {
    fn into_filter(self) -> ApiResult<MetricFilter> {
        Ok(MetricFilter {
            entity_id: self.entity_id,
            metric_name: self.name,
            aggregation_level: parse_param(self.aggregation_level.as_deref())?,
            since: self.since,
            until: self.until,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// GET /api/v1/metrics
pub async fn list_metrics(
    State(state): State<ApiState>,
    query: Result<Query<MetricQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query?;
    let mut filter = query.into_filter()?;
    filter.limit = Some(page_limit(filter.limit));

    let metrics = state.store.list_metrics(filter).await?;

    Ok(Json(json!({
        "count": metrics.len(),
        "metrics": metrics,
    })))
}

/// GET /api/v1/metrics/summary
///
/// `null` when no row matches the filter
pub async fn get_summary(
    State(state): State<ApiState>,
    query: Result<Query<MetricQuery>, QueryRejection>,
) -> ApiResult<Json<Option<MetricSummary>>> {
    let Query(query) = query?;
    let summary = state.store.get_metric_summary(query.into_filter()?).await?;
    Ok(Json(summary))
}
