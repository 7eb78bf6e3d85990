//! Completion monitor.
//!
//! Every poll interval the monitor checks a batch of `processing` jobs
//! against ComfyUI's `/history` and `/queue`, verifies reported output
//! files on disk, and applies the [`assess`] decision with a guarded
//! update. Afterwards it resubmits retries that have come due.
//!
//! A guarded update that matches no row means another actor (a second
//! monitor, an operator cancel) already moved the job; such jobs are
//! counted as superseded and no event is published.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use renderwatch_comfyui::{ComfyUIApiError, ComfyUIBackend, HistoryOutcome, QueuePosition, QueueSnapshot};
use renderwatch_core::completion::{assess, Assessment, Observation};
use renderwatch_core::job_events::{event_for_status, EVENT_JOB_COMPLETED, EVENT_JOB_RETRY_SCHEDULED};
use renderwatch_core::job_status::JobStatus;
use renderwatch_core::types::{DbId, Timestamp};
use renderwatch_db::models::production_job::ProductionJob;
use renderwatch_db::repositories::{ProductionJobRepo, TransitionGuard};
use renderwatch_db::DbPool;
use renderwatch_events::EventBus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorSettings;
use crate::event::job_event;
use crate::stats::MonitorStats;
use crate::submitter::{JobSubmitter, SubmitError, SubmitOutcome};
use crate::verify::OutputVerifier;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ComfyUI error: {0}")]
    ComfyUI(#[from] ComfyUIApiError),
}

impl From<SubmitError> for MonitorError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Database(e) => MonitorError::Database(e),
        }
    }
}

/// Counts for one monitor cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub checked: u64,
    pub completed: u64,
    /// Retries scheduled, including timed-out jobs that will be retried.
    pub retried: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub resubmitted: u64,
    /// Jobs another actor moved before this cycle's update landed.
    pub superseded: u64,
    /// ComfyUI was unreachable and nothing was checked.
    pub skipped: bool,
}

/// What happened to one processing job this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Waiting,
    Completed,
    Retried { timed_out: bool },
    Failed,
    TimedOut,
    Superseded,
}

impl CycleReport {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Waiting => {}
            JobOutcome::Completed => self.completed += 1,
            JobOutcome::Retried { timed_out } => {
                self.retried += 1;
                if timed_out {
                    self.timed_out += 1;
                }
            }
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::TimedOut => self.timed_out += 1,
            JobOutcome::Superseded => self.superseded += 1,
        }
    }

    fn record_submission(&mut self, outcome: &SubmitOutcome) {
        match outcome {
            SubmitOutcome::Submitted { .. } => self.resubmitted += 1,
            SubmitOutcome::RetryScheduled => self.retried += 1,
            SubmitOutcome::Failed => self.failed += 1,
            SubmitOutcome::Superseded => self.superseded += 1,
            SubmitOutcome::Deferred => {}
        }
    }
}

pub struct CompletionMonitor {
    pool: DbPool,
    comfyui: Arc<dyn ComfyUIBackend>,
    bus: Arc<EventBus>,
    submitter: Arc<JobSubmitter>,
    verifier: OutputVerifier,
    settings: MonitorSettings,
    stats: Arc<MonitorStats>,
}

impl CompletionMonitor {
    pub fn new(
        pool: DbPool,
        comfyui: Arc<dyn ComfyUIBackend>,
        bus: Arc<EventBus>,
        submitter: Arc<JobSubmitter>,
        verifier: OutputVerifier,
        settings: MonitorSettings,
        stats: Arc<MonitorStats>,
    ) -> Self {
        Self {
            pool,
            comfyui,
            bus,
            submitter,
            verifier,
            settings,
            stats,
        }
    }

    /// Run cycles until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            output_dir = %self.verifier.root().display(),
            "Completion monitor started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Completion monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report != CycleReport::default() => {
                            tracing::info!(?report, "Monitor cycle finished");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "Monitor cycle failed");
                            self.stats.record_error(e.to_string());
                        }
                    }
                }
            }
        }
    }

    /// One full cycle: check processing jobs, then resubmit due retries.
    pub async fn run_cycle(&self) -> Result<CycleReport, MonitorError> {
        let mut report = CycleReport::default();

        // One snapshot per cycle. Failing here means ComfyUI is down, and
        // no job is penalised for that.
        let queue = match self.comfyui.queue().await {
            Ok(queue) => queue,
            Err(e) => {
                tracing::warn!(error = %e, "ComfyUI unreachable, skipping monitor cycle");
                report.skipped = true;
                self.stats.record_error(format!("ComfyUI unreachable: {e}"));
                self.stats.record_cycle(&report);
                return Ok(report);
            }
        };

        let jobs = ProductionJobRepo::list_processing(&self.pool, self.settings.batch_size).await?;
        let now = Utc::now();
        let mut still_processing: Vec<DbId> = Vec::new();

        for job in &jobs {
            report.checked += 1;
            match self.check_job(job, &queue, now).await {
                Ok(JobOutcome::Waiting) => {
                    still_processing.push(job.id);
                }
                Ok(outcome) => report.record(outcome),
                Err(MonitorError::ComfyUI(e)) => {
                    // ComfyUI went away mid-cycle; stop without judging
                    // the remaining jobs.
                    tracing::warn!(job_id = job.id, error = %e, "ComfyUI lost mid-cycle");
                    self.stats.record_error(format!("ComfyUI unreachable: {e}"));
                    ProductionJobRepo::touch_checked(&self.pool, &still_processing).await?;
                    self.stats.record_cycle(&report);
                    return Ok(report);
                }
                Err(e) => return Err(e),
            }
        }

        ProductionJobRepo::touch_checked(&self.pool, &still_processing).await?;

        self.resubmit_due(&mut report).await?;

        self.stats.clear_error();
        self.stats.record_cycle(&report);
        Ok(report)
    }

    // ---- processing jobs ----

    async fn check_job(
        &self,
        job: &ProductionJob,
        queue: &QueueSnapshot,
        now: Timestamp,
    ) -> Result<JobOutcome, MonitorError> {
        let Some(prompt_id) = job.comfyui_prompt_id.as_deref() else {
            return Ok(JobOutcome::Waiting);
        };

        let observation = self.observe(prompt_id, queue).await?;
        let assessment = assess(
            &job.snapshot(),
            &observation,
            now,
            &self.settings.retry,
            &self.settings.timeout,
            self.settings.lost_grace,
        );

        tracing::debug!(
            job_id = job.id,
            prompt_id,
            ?observation,
            ?assessment,
            "Assessed job",
        );

        if assessment.requires_cancel() {
            self.drop_prompt(job.id, prompt_id).await;
        }

        self.apply(job, prompt_id, assessment).await
    }

    /// Build this cycle's observation of `prompt_id`.
    ///
    /// Only errors meaning ComfyUI is unavailable are returned. Any other
    /// history failure falls back to the queue snapshot, and to
    /// [`Observation::Unknown`] when the queue does not list the prompt, so
    /// the job still times out.
    async fn observe(
        &self,
        prompt_id: &str,
        queue: &QueueSnapshot,
    ) -> Result<Observation, MonitorError> {
        let history = match self.comfyui.history(prompt_id).await {
            Ok(history) => Some(history),
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(prompt_id, error = %e, "Unreadable history, judging by queue only");
                None
            }
        };

        if let Some(entry) = history.as_ref().and_then(Option::as_ref) {
            match entry.outcome() {
                HistoryOutcome::Success => {
                    let verified = self.verifier.verify(&entry.output_files()).await;
                    return Ok(Observation::Succeeded {
                        present: verified.present,
                        missing: verified.missing,
                    });
                }
                HistoryOutcome::Error(message) => {
                    return Ok(Observation::Errored { message });
                }
                HistoryOutcome::Pending => {}
            }
        }

        Ok(match queue.position(prompt_id) {
            Some(QueuePosition::Running) => Observation::Running,
            Some(QueuePosition::Pending(_)) => Observation::Queued,
            None if history.is_none() => Observation::Unknown,
            None => Observation::Missing,
        })
    }

    /// Best-effort removal of a timed-out prompt from ComfyUI.
    ///
    /// The cycle's snapshot may be minutes old by now, so the queue is read
    /// again and the interrupt names the prompt.
    async fn drop_prompt(&self, job_id: DbId, prompt_id: &str) {
        let position = match self.comfyui.queue().await {
            Ok(queue) => queue.position(prompt_id),
            Err(e) => {
                tracing::warn!(job_id, prompt_id, error = %e, "Could not re-read queue before drop");
                return;
            }
        };
        let result = match position {
            Some(QueuePosition::Running) => self.comfyui.interrupt(prompt_id).await,
            Some(QueuePosition::Pending(_)) => self.comfyui.cancel(prompt_id).await,
            None => return,
        };
        if let Err(e) = result {
            tracing::warn!(job_id, prompt_id, error = %e, "Failed to drop timed-out prompt");
        }
    }

    async fn apply(
        &self,
        job: &ProductionJob,
        prompt_id: &str,
        assessment: Assessment,
    ) -> Result<JobOutcome, MonitorError> {
        let guard = TransitionGuard::Processing { prompt_id };

        match assessment {
            Assessment::Wait => Ok(JobOutcome::Waiting),

            Assessment::Complete { output_paths } => {
                if !ProductionJobRepo::mark_completed(&self.pool, job.id, prompt_id, &output_paths)
                    .await?
                {
                    return Ok(JobOutcome::Superseded);
                }
                tracing::info!(job_id = job.id, prompt_id, outputs = output_paths.len(), "Job completed");
                self.bus.publish(job_event(
                    EVENT_JOB_COMPLETED,
                    job,
                    serde_json::json!({
                        "output_paths": output_paths,
                        "output_dir": self.verifier.root().display().to_string(),
                    }),
                ));
                Ok(JobOutcome::Completed)
            }

            Assessment::Retry { reason, delay } => {
                self.schedule_retry(job, guard, &reason, delay, false).await
            }

            Assessment::CancelAndRetry { reason, delay } => {
                self.schedule_retry(job, guard, &reason, delay, true).await
            }

            Assessment::GiveUp { status, reason } => {
                self.give_up(job, guard, status, &reason).await
            }

            Assessment::CancelAndGiveUp { reason } => {
                self.give_up(job, guard, JobStatus::Timeout, &reason).await
            }
        }
    }

    async fn schedule_retry(
        &self,
        job: &ProductionJob,
        guard: TransitionGuard<'_>,
        reason: &str,
        delay: Duration,
        timed_out: bool,
    ) -> Result<JobOutcome, MonitorError> {
        if !ProductionJobRepo::schedule_retry(&self.pool, job.id, guard, reason, delay).await? {
            return Ok(JobOutcome::Superseded);
        }
        let next_retry_at =
            Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        tracing::warn!(
            job_id = job.id,
            reason,
            timed_out,
            retry = job.retry_count + 1,
            max_retries = job.max_retries,
            delay_secs = delay.as_secs(),
            "Job failed, retry scheduled",
        );
        self.bus.publish(job_event(
            EVENT_JOB_RETRY_SCHEDULED,
            job,
            serde_json::json!({
                "reason": reason,
                "timed_out": timed_out,
                "retry_count": job.retry_count + 1,
                "delay_secs": delay.as_secs(),
                "next_retry_at": next_retry_at,
            }),
        ));
        Ok(JobOutcome::Retried { timed_out })
    }

    async fn give_up(
        &self,
        job: &ProductionJob,
        guard: TransitionGuard<'_>,
        status: JobStatus,
        reason: &str,
    ) -> Result<JobOutcome, MonitorError> {
        if !ProductionJobRepo::mark_failed(&self.pool, job.id, guard, status, reason).await? {
            return Ok(JobOutcome::Superseded);
        }
        tracing::error!(
            job_id = job.id,
            status = %status,
            reason,
            retry_count = job.retry_count,
            "Job failed permanently",
        );
        if let Some(event_type) = event_for_status(status) {
            self.bus.publish(job_event(
                event_type,
                job,
                serde_json::json!({ "reason": reason }),
            ));
        }
        Ok(if status == JobStatus::Timeout {
            JobOutcome::TimedOut
        } else {
            JobOutcome::Failed
        })
    }

    // ---- retry executor ----

    async fn resubmit_due(&self, report: &mut CycleReport) -> Result<(), MonitorError> {
        let claimed = ProductionJobRepo::claim_for_submission(
            &self.pool,
            self.settings.batch_size,
            self.settings.stale_pending_after,
        )
        .await?;

        for job in &claimed {
            let outcome = self.submitter.submit(job).await?;
            tracing::debug!(job_id = job.id, ?outcome, "Claimed job submitted");
            report.record_submission(&outcome);
            if outcome == SubmitOutcome::Deferred {
                // ComfyUI went away; the rest stay pending for a later cycle.
                break;
            }
        }
        Ok(())
    }
}
