pub mod events;
pub mod health;
pub mod jobs;
pub mod monitor;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                       list, create
/// /jobs/{id}                  get
/// /jobs/{id}/history          status transitions
/// /jobs/{id}/events           recorded events for the job
/// /jobs/{id}/cancel           cancel (POST)
/// /jobs/{id}/retry            manual retry (POST)
///
/// /events                     durable event log, newest first
///
/// /monitor/status             monitor counters and per-status job counts
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/events", events::router())
        .nest("/monitor", monitor::router())
}
