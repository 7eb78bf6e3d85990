//! Production job entity models and DTOs.

use renderwatch_core::completion::JobSnapshot;
use renderwatch_core::job_status::JobStatus;
use renderwatch_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `production_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProductionJob {
    pub id: DbId,
    pub project_id: Option<DbId>,
    pub character_id: Option<DbId>,
    pub job_type: String,
    pub status: String,
    pub comfyui_prompt_id: Option<String>,
    pub workflow: serde_json::Value,
    pub output_paths: serde_json::Value,
    pub progress_percent: i16,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<Timestamp>,
    pub submitted_at: Option<Timestamp>,
    pub last_checked_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub notified_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProductionJob {
    /// Parsed status. The table's CHECK constraint makes `None` impossible
    /// for rows read from the database.
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// The fields the completion assessment needs.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_type: self.job_type.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            submitted_at: self.submitted_at,
        }
    }

    /// Verified output paths as strings.
    pub fn output_path_list(&self) -> Vec<String> {
        serde_json::from_value(self.output_paths.clone()).unwrap_or_default()
    }
}

/// DTO for creating a job via `POST /api/v1/jobs`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateProductionJob {
    pub project_id: Option<DbId>,
    pub character_id: Option<DbId>,
    #[validate(length(min = 1, max = 64))]
    pub job_type: String,
    /// ComfyUI prompt graph, submitted verbatim.
    pub workflow: serde_json::Value,
    #[validate(range(min = 0, max = 10))]
    pub max_retries: Option<i32>,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (e.g. `processing`).
    pub status: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// A row from the `job_status_history` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobStatusChange {
    pub id: DbId,
    pub job_id: DbId,
    pub from_status: Option<String>,
    pub to_status: String,
    pub reason: Option<String>,
    pub created_at: Timestamp,
}

/// Number of jobs in one status.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}
