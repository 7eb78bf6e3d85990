//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{events, jobs};
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> create_job
/// GET    /{id}            -> get_job
/// GET    /{id}/history    -> job_history
/// GET    /{id}/events     -> events::job_events
/// POST   /{id}/cancel     -> cancel_job
/// POST   /{id}/retry      -> retry_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::create_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/history", get(jobs::job_history))
        .route("/{id}/events", get(events::job_events))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/retry", post(jobs::retry_job))
}
