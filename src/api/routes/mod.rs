//! Route handlers, one module per resource

pub mod alerts;
pub mod entities;
pub mod events;
pub mod health;
pub mod metrics;
pub mod snapshot;
pub mod stats;

use std::str::FromStr;

use super::error::ApiError;

/// Page size used when a list request does not ask for one
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

pub(crate) fn page_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

/// Parse an optional query value into one of the store's closed enums
pub(crate) fn parse_param<T>(value: Option<&str>) -> Result<Option<T>, ApiError>
where
    T: FromStr,
    ApiError: From<T::Err>,
{
    value.map(str::parse).transpose().map_err(ApiError::from)
}
