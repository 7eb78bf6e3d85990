//! Read access to the durable event log.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use renderwatch_core::error::CoreError;
use renderwatch_core::types::DbId;
use renderwatch_db::models::event::EventListQuery;
use renderwatch_db::repositories::{EventRepo, ProductionJobRepo};
use renderwatch_events::bus::ENTITY_PRODUCTION_JOB;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/events
///
/// Newest first. Supports `limit` (max 200) and `offset`.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventListQuery>,
) -> AppResult<impl IntoResponse> {
    let events = EventRepo::list_recent(&state.pool, params.limit(), params.offset()).await?;
    Ok(Json(DataResponse { data: events }))
}

/// GET /api/v1/jobs/{id}/events
///
/// Every recorded event about one job, oldest first.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    if ProductionJobRepo::find_by_id(&state.pool, job_id).await?.is_none() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "ProductionJob",
            id: job_id,
        }));
    }
    let events = EventRepo::list_for_entity(&state.pool, ENTITY_PRODUCTION_JOB, job_id).await?;
    Ok(Json(DataResponse { data: events }))
}
