//! Repository for the `job_status_history` audit table.

use renderwatch_core::job_status::JobStatus;
use renderwatch_core::types::DbId;
use sqlx::{PgExecutor, PgPool};

use crate::models::production_job::JobStatusChange;

/// Column list for `job_status_history` queries.
const COLUMNS: &str = "id, job_id, from_status, to_status, reason, created_at";

/// Append-only log of job status transitions.
pub struct JobStatusHistoryRepo;

impl JobStatusHistoryRepo {
    /// Append one transition. Accepts any executor so callers can record
    /// inside the transaction that performed the status update.
    pub async fn record<'e, E>(
        executor: E,
        job_id: DbId,
        from: Option<JobStatus>,
        to: JobStatus,
        reason: Option<&str>,
    ) -> Result<DbId, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar(
            "INSERT INTO job_status_history (job_id, from_status, to_status, reason) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(job_id)
        .bind(from.map(|s| s.as_str()))
        .bind(to.as_str())
        .bind(reason)
        .fetch_one(executor)
        .await
    }

    /// All transitions of a job, oldest first.
    pub async fn list_for_job(
        pool: &PgPool,
        job_id: DbId,
    ) -> Result<Vec<JobStatusChange>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_status_history \
             WHERE job_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, JobStatusChange>(&query)
            .bind(job_id)
            .fetch_all(pool)
            .await
    }
}
