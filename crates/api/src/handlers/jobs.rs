//! Handlers for the `/jobs` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use renderwatch_comfyui::QueuePosition;
use renderwatch_core::error::CoreError;
use renderwatch_core::job_events::{EVENT_JOB_CANCELLED, EVENT_JOB_RETRY_SCHEDULED};
use renderwatch_core::job_status::JobStatus;
use renderwatch_core::types::DbId;
use renderwatch_db::models::production_job::{CreateProductionJob, JobListQuery, ProductionJob};
use renderwatch_db::repositories::{JobStatusHistoryRepo, ProductionJobRepo};
use renderwatch_worker::event::job_event;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn find_job(pool: &sqlx::PgPool, job_id: DbId) -> AppResult<ProductionJob> {
    ProductionJobRepo::find_by_id(pool, job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "ProductionJob",
            id: job_id,
        }))
}

/// Ask ComfyUI to drop a prompt: interrupt it if running, delete it if
/// queued. Failures are logged only; the database is authoritative.
async fn drop_prompt(state: &AppState, job_id: DbId, prompt_id: &str) {
    let position = match state.comfyui.queue().await {
        Ok(queue) => queue.position(prompt_id),
        Err(e) => {
            tracing::warn!(job_id, prompt_id, error = %e, "Could not read ComfyUI queue");
            return;
        }
    };
    let result = match position {
        Some(QueuePosition::Running) => state.comfyui.interrupt(prompt_id).await,
        Some(QueuePosition::Pending(_)) => state.comfyui.cancel(prompt_id).await,
        None => return,
    };
    if let Err(e) = result {
        tracing::warn!(
            job_id,
            prompt_id,
            error = %e,
            "Failed to drop prompt on ComfyUI (job already cancelled in DB)",
        );
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Insert a `pending` job and submit it to ComfyUI immediately. Returns 201
/// with the job as it stands after the submission attempt (`processing`
/// on success, still `pending` if ComfyUI is unreachable).
pub async fn create_job(
    State(state): State<AppState>,
    Json(input): Json<CreateProductionJob>,
) -> AppResult<impl IntoResponse> {
    input.validate()?;
    match input.workflow.as_object() {
        Some(graph) if !graph.is_empty() => {}
        _ => {
            return Err(AppError::Core(CoreError::Validation(
                "workflow must be a non-empty JSON object".into(),
            )))
        }
    }

    let default_max_retries = state.submitter.retry_policy().max_retries;
    let job = ProductionJobRepo::create(&state.pool, &input, default_max_retries).await?;
    tracing::info!(job_id = job.id, job_type = %job.job_type, "Job created");

    let outcome = state.submitter.submit(&job).await?;
    tracing::debug!(job_id = job.id, ?outcome, "Initial submission");

    let job = find_job(&state.pool, job.id).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: job })))
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Newest first. Supports `status`, `limit` (max 100) and `offset`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    if let Some(status) = params.status.as_deref() {
        if JobStatus::parse(status).is_none() {
            return Err(AppError::BadRequest(format!("Unknown job status '{status}'")));
        }
    }
    let jobs = ProductionJobRepo::list(&state.pool, &params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = find_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/history
///
/// Status transitions, oldest first.
pub async fn job_history(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    find_job(&state.pool, job_id).await?;
    let history = JobStatusHistoryRepo::list_for_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: history }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Cancel a non-terminal job. Returns 409 if the job is already terminal.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let Some(previous) =
        ProductionJobRepo::cancel(&state.pool, job_id, "cancelled by operator").await?
    else {
        let job = find_job(&state.pool, job_id).await?;
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Job is already {} and cannot be cancelled",
            job.status
        ))));
    };

    if previous.job_status() == Some(JobStatus::Processing) {
        if let Some(prompt_id) = previous.comfyui_prompt_id.as_deref() {
            drop_prompt(&state, job_id, prompt_id).await;
        }
    }

    state.event_bus.publish(job_event(
        EVENT_JOB_CANCELLED,
        &previous,
        serde_json::json!({ "previous_status": previous.status }),
    ));
    tracing::info!(job_id, from = %previous.status, "Job cancelled");

    let job = find_job(&state.pool, job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/retry
///
/// Operator retry of a `failed`, `timeout` or `cancelled` job. The retry
/// count is reset and the monitor resubmits on its next cycle. Returns 409
/// for any other status.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let Some(job) = ProductionJobRepo::manual_retry(&state.pool, job_id).await? else {
        let job = find_job(&state.pool, job_id).await?;
        return Err(AppError::Core(CoreError::Conflict(format!(
            "Only failed, timed out or cancelled jobs can be retried (job is {})",
            job.status
        ))));
    };

    state.event_bus.publish(job_event(
        EVENT_JOB_RETRY_SCHEDULED,
        &job,
        serde_json::json!({ "reason": "manual retry", "manual": true }),
    ));
    tracing::info!(job_id, "Manual retry scheduled");

    Ok(Json(DataResponse { data: job }))
}
