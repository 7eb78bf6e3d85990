//! Submits claimed jobs to ComfyUI.
//!
//! Jobs reach the submitter in `pending` (freshly created, or claimed from
//! `retry_scheduled` by the monitor). A successful `POST /prompt` moves the
//! job to `processing` through a guarded update; a rejected prompt goes
//! through the retry policy. When ComfyUI is unreachable the job is left
//! `pending` without spending a retry and is reclaimed later.

use std::sync::Arc;

use renderwatch_comfyui::ComfyUIBackend;
use renderwatch_core::job_events::{
    EVENT_JOB_FAILED, EVENT_JOB_RESUBMITTED, EVENT_JOB_RETRY_SCHEDULED, EVENT_JOB_SUBMITTED,
};
use renderwatch_core::job_status::JobStatus;
use renderwatch_core::retry::{should_retry, RetryPolicy};
use renderwatch_db::models::production_job::ProductionJob;
use renderwatch_db::repositories::{ProductionJobRepo, TransitionGuard};
use renderwatch_db::DbPool;
use renderwatch_events::EventBus;

use crate::event::job_event;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What happened to a job handed to [`JobSubmitter::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// ComfyUI accepted the prompt; the job is `processing`.
    Submitted { prompt_id: String },
    /// ComfyUI rejected the prompt; another attempt is scheduled.
    RetryScheduled,
    /// ComfyUI rejected the prompt and no retries remain.
    Failed,
    /// ComfyUI was unreachable; the job stays `pending`.
    Deferred,
    /// The job left `pending` while the request was in flight
    /// (e.g. cancelled); nothing was changed.
    Superseded,
}

pub struct JobSubmitter {
    pool: DbPool,
    comfyui: Arc<dyn ComfyUIBackend>,
    bus: Arc<EventBus>,
    retry: RetryPolicy,
    client_id: String,
}

impl JobSubmitter {
    /// `client_id` must match the WebSocket bridge's id for progress
    /// frames to reach it.
    pub fn new(
        pool: DbPool,
        comfyui: Arc<dyn ComfyUIBackend>,
        bus: Arc<EventBus>,
        retry: RetryPolicy,
        client_id: String,
    ) -> Self {
        Self {
            pool,
            comfyui,
            bus,
            retry,
            client_id,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Submit one `pending` job.
    pub async fn submit(&self, job: &ProductionJob) -> Result<SubmitOutcome, SubmitError> {
        let resubmission = job.retry_count > 0 || job.comfyui_prompt_id.is_some();

        let response = match self.comfyui.submit(&job.workflow, &self.client_id).await {
            Ok(response) => response,
            Err(e) if e.is_unavailable() => {
                tracing::warn!(job_id = job.id, error = %e, "ComfyUI unavailable, submission deferred");
                return Ok(SubmitOutcome::Deferred);
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "ComfyUI rejected workflow");
                return self.reject(job, &format!("submission rejected: {e}")).await;
            }
        };

        let prompt_id = response.prompt_id;
        if !ProductionJobRepo::mark_submitted(&self.pool, job.id, &prompt_id).await? {
            tracing::info!(
                job_id = job.id,
                prompt_id = %prompt_id,
                "Job left pending during submission, dropping prompt",
            );
            if let Err(e) = self.comfyui.cancel(&prompt_id).await {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to drop orphaned prompt");
            }
            return Ok(SubmitOutcome::Superseded);
        }

        tracing::info!(
            job_id = job.id,
            prompt_id = %prompt_id,
            queue_number = response.number,
            retry_count = job.retry_count,
            "Workflow submitted to ComfyUI",
        );

        let event_type = if resubmission {
            EVENT_JOB_RESUBMITTED
        } else {
            EVENT_JOB_SUBMITTED
        };
        let mut submitted = job.clone();
        submitted.comfyui_prompt_id = Some(prompt_id.clone());
        self.bus.publish(job_event(
            event_type,
            &submitted,
            serde_json::json!({ "queue_number": response.number }),
        ));

        Ok(SubmitOutcome::Submitted { prompt_id })
    }

    async fn reject(&self, job: &ProductionJob, reason: &str) -> Result<SubmitOutcome, SubmitError> {
        if should_retry(job.retry_count, job.max_retries) {
            let delay = self.retry.delay_for_attempt(job.retry_count);
            if !ProductionJobRepo::schedule_retry(
                &self.pool,
                job.id,
                TransitionGuard::Pending,
                reason,
                delay,
            )
            .await?
            {
                return Ok(SubmitOutcome::Superseded);
            }
            self.bus.publish(job_event(
                EVENT_JOB_RETRY_SCHEDULED,
                job,
                serde_json::json!({
                    "reason": reason,
                    "retry_count": job.retry_count + 1,
                    "delay_secs": delay.as_secs(),
                }),
            ));
            Ok(SubmitOutcome::RetryScheduled)
        } else {
            if !ProductionJobRepo::mark_failed(
                &self.pool,
                job.id,
                TransitionGuard::Pending,
                JobStatus::Failed,
                reason,
            )
            .await?
            {
                return Ok(SubmitOutcome::Superseded);
            }
            self.bus.publish(job_event(
                EVENT_JOB_FAILED,
                job,
                serde_json::json!({ "reason": reason }),
            ));
            Ok(SubmitOutcome::Failed)
        }
    }
}
