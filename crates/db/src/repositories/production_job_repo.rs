//! Repository for the `production_jobs` table.
//!
//! Every status change is a guarded `UPDATE` whose `WHERE` clause names the
//! state the caller observed. When another monitor (or an API request) got
//! there first the update matches zero rows and the method returns `false`,
//! so a job is never processed twice. Successful transitions append a row
//! to `job_status_history` in the same transaction and clear `notified_at`,
//! since the downstream has not yet heard about the new status.

use std::time::Duration;

use renderwatch_core::job_status::JobStatus;
use renderwatch_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::production_job::{
    CreateProductionJob, JobListQuery, ProductionJob, StatusCount,
};
use crate::repositories::JobStatusHistoryRepo;

/// Column list for `production_jobs` queries.
const COLUMNS: &str = "\
    id, project_id, character_id, job_type, status, comfyui_prompt_id, \
    workflow, output_paths, progress_percent, error_message, \
    retry_count, max_retries, next_retry_at, \
    submitted_at, last_checked_at, completed_at, notified_at, \
    created_at, updated_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// The state a guarded transition expects the job to be in.
///
/// Both variants bind the prompt id as `$2` so callers can share one
/// parameter layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGuard<'a> {
    /// Processing exactly this ComfyUI prompt.
    Processing { prompt_id: &'a str },
    /// Claimed for submission but not yet accepted by ComfyUI.
    Pending,
}

impl<'a> TransitionGuard<'a> {
    fn clause(&self) -> String {
        match self {
            TransitionGuard::Processing { .. } => format!(
                "status = '{}' AND comfyui_prompt_id = $2",
                JobStatus::Processing.as_str()
            ),
            TransitionGuard::Pending => {
                format!("status = '{}' AND $2::TEXT IS NULL", JobStatus::Pending.as_str())
            }
        }
    }

    fn prompt_id(&self) -> Option<&'a str> {
        match *self {
            TransitionGuard::Processing { prompt_id } => Some(prompt_id),
            TransitionGuard::Pending => None,
        }
    }

    fn from_status(&self) -> JobStatus {
        match self {
            TransitionGuard::Processing { .. } => JobStatus::Processing,
            TransitionGuard::Pending => JobStatus::Pending,
        }
    }
}

/// Reject a move [`JobStatus::can_transition_to`] does not allow.
fn ensure_legal(from: JobStatus, to: JobStatus) -> Result<(), sqlx::Error> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(sqlx::Error::Protocol(format!(
            "illegal job transition {from} -> {to}"
        )))
    }
}

/// Provides queries and guarded status transitions for production jobs.
pub struct ProductionJobRepo;

impl ProductionJobRepo {
    // ── Creation and lookup ──────────────────────────────────────────

    /// Insert a new `pending` job. `default_max_retries` applies when the
    /// input does not set its own ceiling.
    pub async fn create(
        pool: &PgPool,
        input: &CreateProductionJob,
        default_max_retries: i32,
    ) -> Result<ProductionJob, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let query = format!(
            "INSERT INTO production_jobs \
                 (project_id, character_id, job_type, status, workflow, max_retries) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, ProductionJob>(&query)
            .bind(input.project_id)
            .bind(input.character_id)
            .bind(&input.job_type)
            .bind(JobStatus::Pending.as_str())
            .bind(&input.workflow)
            .bind(input.max_retries.unwrap_or(default_max_retries))
            .fetch_one(&mut *tx)
            .await?;
        JobStatusHistoryRepo::record(&mut *tx, job.id, None, JobStatus::Pending, Some("created"))
            .await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ProductionJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM production_jobs WHERE id = $1");
        sqlx::query_as::<_, ProductionJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List jobs newest-first with an optional status filter.
    pub async fn list(
        pool: &PgPool,
        params: &JobListQuery,
    ) -> Result<Vec<ProductionJob>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        let query = if params.status.is_some() {
            format!(
                "SELECT {COLUMNS} FROM production_jobs \
                 WHERE status = $1 \
                 ORDER BY created_at DESC, id DESC \
                 LIMIT $2 OFFSET $3"
            )
        } else {
            format!(
                "SELECT {COLUMNS} FROM production_jobs \
                 ORDER BY created_at DESC, id DESC \
                 LIMIT $1 OFFSET $2"
            )
        };

        let mut q = sqlx::query_as::<_, ProductionJob>(&query);
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        q.bind(limit).bind(offset).fetch_all(pool).await
    }

    /// Processing jobs with a prompt id, least recently checked first.
    pub async fn list_processing(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<ProductionJob>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM production_jobs \
             WHERE status = $1 AND comfyui_prompt_id IS NOT NULL \
             ORDER BY last_checked_at ASC NULLS FIRST, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, ProductionJob>(&query)
            .bind(JobStatus::Processing.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Number of jobs per status.
    pub async fn count_by_status(pool: &PgPool) -> Result<Vec<StatusCount>, sqlx::Error> {
        sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM production_jobs \
             GROUP BY status ORDER BY status",
        )
        .fetch_all(pool)
        .await
    }

    // ── Monitor bookkeeping ──────────────────────────────────────────

    /// Stamp `last_checked_at` on jobs the monitor observed this cycle.
    pub async fn touch_checked(pool: &PgPool, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result =
            sqlx::query("UPDATE production_jobs SET last_checked_at = NOW() WHERE id = ANY($1)")
                .bind(ids)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Record live progress for the job processing `prompt_id`.
    ///
    /// Returns the job id, or `None` when no processing job owns the prompt.
    pub async fn update_progress(
        pool: &PgPool,
        prompt_id: &str,
        percent: i16,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE production_jobs SET progress_percent = $3 \
             WHERE comfyui_prompt_id = $1 AND status = $2 \
             RETURNING id",
        )
        .bind(prompt_id)
        .bind(JobStatus::Processing.as_str())
        .bind(percent.clamp(0, 100))
        .fetch_optional(pool)
        .await
    }

    /// Record that the downstream system acknowledged the event for
    /// `status`.
    ///
    /// Only stamps when the job is still in `status`; an acknowledgement
    /// that arrives after the job moved on returns `false`.
    pub async fn mark_notified(
        pool: &PgPool,
        job_id: DbId,
        status: JobStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE production_jobs SET notified_at = NOW() WHERE id = $1 AND status = $2",
        )
        .bind(job_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Atomically claim jobs that need (re)submission: retries that are due,
    /// plus `pending` jobs untouched for `stale_after` (a submitter died
    /// between insert and submit).
    ///
    /// Claimed rows are moved to `pending`, which bumps `updated_at` and
    /// hides them from other claimers. Each `retry_scheduled → pending`
    /// move is recorded in `job_status_history` by the same statement;
    /// stale `pending` rows keep their status and get no history row. Uses
    /// `FOR UPDATE SKIP LOCKED` so concurrent monitors never claim the same
    /// job.
    pub async fn claim_for_submission(
        pool: &PgPool,
        limit: i64,
        stale_after: Duration,
    ) -> Result<Vec<ProductionJob>, sqlx::Error> {
        debug_assert!(JobStatus::RetryScheduled.can_transition_to(JobStatus::Pending));
        let query = format!(
            "WITH due AS ( \
                 SELECT id, status AS prev_status FROM production_jobs \
                 WHERE (status = $2 AND next_retry_at <= NOW()) \
                    OR (status = $1 AND updated_at < NOW() - make_interval(secs => $3)) \
                 ORDER BY COALESCE(next_retry_at, updated_at) ASC \
                 LIMIT $4 \
                 FOR UPDATE SKIP LOCKED \
             ), \
             claimed AS ( \
                 UPDATE production_jobs j \
                 SET status = $1, next_retry_at = NULL, notified_at = NULL \
                 FROM due \
                 WHERE j.id = due.id \
                 RETURNING j.*, due.prev_status \
             ), \
             audit AS ( \
                 INSERT INTO job_status_history (job_id, from_status, to_status, reason) \
                 SELECT id, prev_status, $1, $5 FROM claimed WHERE prev_status = $2 \
             ) \
             SELECT {COLUMNS} FROM claimed ORDER BY id"
        );
        sqlx::query_as::<_, ProductionJob>(&query)
            .bind(JobStatus::Pending.as_str())
            .bind(JobStatus::RetryScheduled.as_str())
            .bind(stale_after.as_secs_f64())
            .bind(limit)
            .bind("retry due")
            .fetch_all(pool)
            .await
    }

    /// `pending → processing` once ComfyUI accepted the prompt.
    pub async fn mark_submitted(
        pool: &PgPool,
        job_id: DbId,
        prompt_id: &str,
    ) -> Result<bool, sqlx::Error> {
        ensure_legal(JobStatus::Pending, JobStatus::Processing)?;
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE production_jobs \
             SET status = $3, comfyui_prompt_id = $2, submitted_at = NOW(), \
                 next_retry_at = NULL, progress_percent = 0, last_checked_at = NULL, \
                 notified_at = NULL \
             WHERE id = $1 AND status = $4",
        )
        .bind(job_id)
        .bind(prompt_id)
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if updated {
            let reason = format!("submitted as prompt {prompt_id}");
            JobStatusHistoryRepo::record(
                &mut *tx,
                job_id,
                Some(JobStatus::Pending),
                JobStatus::Processing,
                Some(&reason),
            )
            .await?;
        }
        tx.commit().await?;
        Ok(updated)
    }

    // ── Outcomes ─────────────────────────────────────────────────────

    /// `processing → completed` with verified output paths.
    pub async fn mark_completed(
        pool: &PgPool,
        job_id: DbId,
        prompt_id: &str,
        output_paths: &[String],
    ) -> Result<bool, sqlx::Error> {
        let guard = TransitionGuard::Processing { prompt_id };
        ensure_legal(guard.from_status(), JobStatus::Completed)?;
        let query = format!(
            "UPDATE production_jobs \
             SET status = $3, output_paths = $4, progress_percent = 100, \
                 error_message = NULL, completed_at = NOW(), last_checked_at = NOW(), \
                 notified_at = NULL \
             WHERE id = $1 AND {}",
            guard.clause()
        );
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(&query)
            .bind(job_id)
            .bind(guard.prompt_id())
            .bind(JobStatus::Completed.as_str())
            .bind(serde_json::json!(output_paths))
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        Self::finish_transition(tx, updated, job_id, guard, JobStatus::Completed, None).await
    }

    /// Move a failed attempt to `retry_scheduled`, spending one retry.
    pub async fn schedule_retry(
        pool: &PgPool,
        job_id: DbId,
        guard: TransitionGuard<'_>,
        reason: &str,
        delay: Duration,
    ) -> Result<bool, sqlx::Error> {
        ensure_legal(guard.from_status(), JobStatus::RetryScheduled)?;
        let query = format!(
            "UPDATE production_jobs \
             SET status = $3, retry_count = retry_count + 1, \
                 next_retry_at = NOW() + make_interval(secs => $4), \
                 error_message = $5, progress_percent = 0, last_checked_at = NOW(), \
                 notified_at = NULL \
             WHERE id = $1 AND {}",
            guard.clause()
        );
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(&query)
            .bind(job_id)
            .bind(guard.prompt_id())
            .bind(JobStatus::RetryScheduled.as_str())
            .bind(delay.as_secs_f64())
            .bind(reason)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        Self::finish_transition(
            tx,
            updated,
            job_id,
            guard,
            JobStatus::RetryScheduled,
            Some(reason),
        )
        .await
    }

    /// Give up on a job: `failed` or `timeout`.
    pub async fn mark_failed(
        pool: &PgPool,
        job_id: DbId,
        guard: TransitionGuard<'_>,
        status: JobStatus,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        debug_assert!(matches!(status, JobStatus::Failed | JobStatus::Timeout));
        ensure_legal(guard.from_status(), status)?;
        let query = format!(
            "UPDATE production_jobs \
             SET status = $3, error_message = $4, completed_at = NOW(), \
                 next_retry_at = NULL, last_checked_at = NOW(), notified_at = NULL \
             WHERE id = $1 AND {}",
            guard.clause()
        );
        let mut tx = pool.begin().await?;
        let updated = sqlx::query(&query)
            .bind(job_id)
            .bind(guard.prompt_id())
            .bind(status.as_str())
            .bind(reason)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            > 0;

        Self::finish_transition(tx, updated, job_id, guard, status, Some(reason)).await
    }

    // ── Operator actions ─────────────────────────────────────────────

    /// Cancel a non-terminal job.
    ///
    /// Returns the row as it was *before* cancellation (so the caller can
    /// tell ComfyUI to drop the prompt), or `None` if the job does not
    /// exist or is already terminal.
    pub async fn cancel(
        pool: &PgPool,
        job_id: DbId,
        reason: &str,
    ) -> Result<Option<ProductionJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let Some(job) = Self::lock(&mut tx, job_id).await? else {
            return Ok(None);
        };
        let Some(from) = job
            .job_status()
            .filter(|s| s.can_transition_to(JobStatus::Cancelled))
        else {
            return Ok(None);
        };

        sqlx::query(
            "UPDATE production_jobs \
             SET status = $2, error_message = $3, completed_at = NOW(), next_retry_at = NULL, \
                 notified_at = NULL \
             WHERE id = $1",
        )
        .bind(job_id)
        .bind(JobStatus::Cancelled.as_str())
        .bind(reason)
        .execute(&mut *tx)
        .await?;
        JobStatusHistoryRepo::record(
            &mut *tx,
            job_id,
            Some(from),
            JobStatus::Cancelled,
            Some(reason),
        )
        .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    /// Operator retry of a `failed`, `timeout` or `cancelled` job.
    ///
    /// Resets `retry_count` so the job gets a fresh automatic retry budget
    /// and schedules it immediately. Returns `None` if the job does not
    /// exist or is not in a retryable state.
    pub async fn manual_retry(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Option<ProductionJob>, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let Some(job) = Self::lock(&mut tx, job_id).await? else {
            return Ok(None);
        };
        let Some(from) = job.job_status().filter(JobStatus::is_manually_retryable) else {
            return Ok(None);
        };

        let query = format!(
            "UPDATE production_jobs \
             SET status = $2, retry_count = 0, next_retry_at = NOW(), \
                 completed_at = NULL, progress_percent = 0, notified_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let updated = sqlx::query_as::<_, ProductionJob>(&query)
            .bind(job_id)
            .bind(JobStatus::RetryScheduled.as_str())
            .fetch_one(&mut *tx)
            .await?;
        JobStatusHistoryRepo::record(
            &mut *tx,
            job_id,
            Some(from),
            JobStatus::RetryScheduled,
            Some("manual retry"),
        )
        .await?;
        tx.commit().await?;
        Ok(Some(updated))
    }

    // ── private helpers ──────────────────────────────────────────────

    /// `SELECT ... FOR UPDATE` inside an open transaction.
    async fn lock(
        tx: &mut Transaction<'_, Postgres>,
        job_id: DbId,
    ) -> Result<Option<ProductionJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM production_jobs WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, ProductionJob>(&query)
            .bind(job_id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Append the history row for a guarded update and commit.
    async fn finish_transition(
        mut tx: Transaction<'_, Postgres>,
        updated: bool,
        job_id: DbId,
        guard: TransitionGuard<'_>,
        to: JobStatus,
        reason: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        if updated {
            JobStatusHistoryRepo::record(&mut *tx, job_id, Some(guard.from_status()), to, reason)
                .await?;
        }
        tx.commit().await?;
        Ok(updated)
    }
}
