//! REST API of the agent
//!
//! A thin axum layer over the store's read operations and the alert
//! engine's operator actions. Every response is JSON.
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Store health
//! - `GET /api/v1/stats` - Database statistics
//! - `GET /api/v1/entities` - List entities (`type`, `status`, `name`, `limit`, `offset`)
//! - `GET /api/v1/entities/:id`, `GET /api/v1/entities/by-name/:type/:name`
//! - `GET /api/v1/events` - List events (`entity_id`, `type`, `severity`, `since`, `until`, ...)
//! - `GET /api/v1/events/:id`
//! - `GET /api/v1/metrics`, `GET /api/v1/metrics/summary`
//! - `GET /api/v1/alerts`, `GET /api/v1/alerts/history`, `GET /api/v1/alerts/:id`
//! - `POST /api/v1/alerts/:id/acknowledge`, `POST /api/v1/alerts/:id/resolve`
//! - `GET /api/v1/snapshot` - Latest collected samples
//!
//! ## Errors
//!
//! Missing records answer 404, malformed parameters 400. Storage and other
//! internal failures answer 500 with a generic body; the detail is logged.

pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::future::Future;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/stats", get(routes::stats::get_stats))
        .route("/entities", get(routes::entities::list_entities))
        .route("/entities/:id", get(routes::entities::get_entity))
        .route(
            "/entities/by-name/:type/:name",
            get(routes::entities::get_entity_by_name),
        )
        .route("/events", get(routes::events::list_events))
        .route("/events/:id", get(routes::events::get_event))
        .route("/metrics", get(routes::metrics::list_metrics))
        .route("/metrics/summary", get(routes::metrics::get_summary))
        .route("/alerts", get(routes::alerts::list_active))
        .route("/alerts/history", get(routes::alerts::list_history))
        .route("/alerts/:id", get(routes::alerts::get_alert))
        .route("/alerts/:id/acknowledge", post(routes::alerts::acknowledge))
        .route("/alerts/:id/resolve", post(routes::alerts::resolve))
        .route("/snapshot", get(routes::snapshot::get_snapshot));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listener` until `shutdown` completes
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("API server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("API server stopped");
    Ok(())
}
