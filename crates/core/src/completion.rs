//! Completion assessment for jobs that are processing on ComfyUI.
//!
//! The monitor gathers an [`Observation`] for each processing job (history
//! outcome with verified files, or queue position) and [`assess`] turns it
//! into an [`Assessment`]. All timing and retry rules live here so they
//! can be tested without a database or a ComfyUI server.

use std::time::Duration;

use serde::Serialize;

use crate::job_status::JobStatus;
use crate::retry::{should_retry, RetryPolicy};
use crate::timeout::TimeoutPolicy;
use crate::types::Timestamp;

/// Grace period during which a prompt missing from both history and queue
/// is assumed to be in flight rather than lost.
pub const DEFAULT_LOST_GRACE: Duration = Duration::from_secs(60);

/// The fields of a job that the assessment depends on.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub job_type: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub submitted_at: Option<Timestamp>,
}

/// What the monitor saw for one job during a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// History reports success. File existence has already been checked;
    /// paths are relative to the output directory.
    Succeeded {
        present: Vec<String>,
        missing: Vec<String>,
    },
    /// History reports an execution error.
    Errored { message: String },
    /// The prompt is currently executing.
    Running,
    /// The prompt is waiting in the ComfyUI queue.
    Queued,
    /// ComfyUI knows nothing about the prompt.
    Missing,
    /// History could not be read and the queue does not list the prompt.
    /// Only the timeout can decide anything.
    Unknown,
}

/// What the monitor should do with the job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Assessment {
    /// Outputs verified; mark completed.
    Complete { output_paths: Vec<String> },
    /// Failed with retries left; resubmit after `delay`.
    Retry { reason: String, delay: Duration },
    /// Failed and out of retries.
    GiveUp { status: JobStatus, reason: String },
    /// Timed out while ComfyUI still holds the prompt; cancel it there
    /// first, then resubmit after `delay`.
    CancelAndRetry { reason: String, delay: Duration },
    /// Timed out and out of retries; cancel on ComfyUI and give up.
    CancelAndGiveUp { reason: String },
    /// Nothing to do yet.
    Wait,
}

impl Assessment {
    /// Whether ComfyUI must be told to drop the prompt before the
    /// database transition is applied.
    pub fn requires_cancel(&self) -> bool {
        matches!(
            self,
            Assessment::CancelAndRetry { .. } | Assessment::CancelAndGiveUp { .. }
        )
    }

    /// Status the job ends up in, or `None` for [`Assessment::Wait`].
    pub fn target_status(&self) -> Option<JobStatus> {
        match self {
            Assessment::Complete { .. } => Some(JobStatus::Completed),
            Assessment::Retry { .. } | Assessment::CancelAndRetry { .. } => {
                Some(JobStatus::RetryScheduled)
            }
            Assessment::GiveUp { status, .. } => Some(*status),
            Assessment::CancelAndGiveUp { .. } => Some(JobStatus::Timeout),
            Assessment::Wait => None,
        }
    }
}

/// Assess a processing job given this cycle's observation.
pub fn assess(
    job: &JobSnapshot,
    observation: &Observation,
    now: Timestamp,
    retry: &RetryPolicy,
    timeout: &TimeoutPolicy,
    lost_grace: Duration,
) -> Assessment {
    match observation {
        Observation::Succeeded { present, missing } => {
            if !missing.is_empty() {
                failure(job, retry, format!("output files missing: {}", missing.join(", ")))
            } else if present.is_empty() {
                failure(job, retry, "no outputs produced".to_string())
            } else {
                Assessment::Complete {
                    output_paths: present.clone(),
                }
            }
        }
        Observation::Errored { message } => failure(job, retry, message.clone()),
        Observation::Running | Observation::Queued | Observation::Unknown => {
            if timeout.is_timed_out(&job.job_type, job.submitted_at, now) {
                let reason = format!(
                    "timed out after {}s",
                    timeout.timeout_for(&job.job_type).as_secs()
                );
                if should_retry(job.retry_count, job.max_retries) {
                    Assessment::CancelAndRetry {
                        reason,
                        delay: retry.delay_for_attempt(job.retry_count),
                    }
                } else {
                    Assessment::CancelAndGiveUp { reason }
                }
            } else {
                Assessment::Wait
            }
        }
        Observation::Missing => {
            let within_grace = match job.submitted_at {
                Some(submitted_at) => (now - submitted_at)
                    .to_std()
                    .map(|elapsed| elapsed <= lost_grace)
                    .unwrap_or(true),
                None => false,
            };
            if within_grace {
                Assessment::Wait
            } else {
                failure(job, retry, "prompt lost by ComfyUI".to_string())
            }
        }
    }
}

fn failure(job: &JobSnapshot, retry: &RetryPolicy, reason: String) -> Assessment {
    if should_retry(job.retry_count, job.max_retries) {
        Assessment::Retry {
            reason,
            delay: retry.delay_for_attempt(job.retry_count),
        }
    } else {
        Assessment::GiveUp {
            status: JobStatus::Failed,
            reason,
        }
    }
}
