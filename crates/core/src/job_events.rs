//! Event names for production job lifecycle updates.
//!
//! `MSG_TYPE_*` values are the `type` field of WebSocket messages sent to
//! browser clients; `EVENT_*` values are event names on the event bus and
//! in the `events` table.

use crate::job_status::JobStatus;

/// Progress update during execution (percentage + current node).
pub const MSG_TYPE_JOB_PROGRESS: &str = "job_progress";

/// Job completed with verified outputs.
pub const MSG_TYPE_JOB_COMPLETED: &str = "job_completed";

/// Job failed permanently.
pub const MSG_TYPE_JOB_FAILED: &str = "job_failed";

/// Job exceeded its timeout and will not be retried.
pub const MSG_TYPE_JOB_TIMEOUT: &str = "job_timeout";

/// Job failed and a retry has been scheduled.
pub const MSG_TYPE_JOB_RETRY_SCHEDULED: &str = "job_retry_scheduled";

/// Job was submitted to ComfyUI again.
pub const MSG_TYPE_JOB_RESUBMITTED: &str = "job_resubmitted";

/// Job was cancelled.
pub const MSG_TYPE_JOB_CANCELLED: &str = "job_cancelled";

pub const EVENT_JOB_SUBMITTED: &str = "job.submitted";
pub const EVENT_JOB_COMPLETED: &str = "job.completed";
pub const EVENT_JOB_FAILED: &str = "job.failed";
pub const EVENT_JOB_TIMEOUT: &str = "job.timeout";
pub const EVENT_JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
pub const EVENT_JOB_RESUBMITTED: &str = "job.resubmitted";
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

/// Events forwarded to the downstream orchestrator.
pub const DOWNSTREAM_EVENTS: [&str; 4] = [
    EVENT_JOB_COMPLETED,
    EVENT_JOB_FAILED,
    EVENT_JOB_TIMEOUT,
    EVENT_JOB_RETRY_SCHEDULED,
];

/// Event bus name for a transition into `status`.
pub fn event_for_status(status: JobStatus) -> Option<&'static str> {
    match status {
        JobStatus::Completed => Some(EVENT_JOB_COMPLETED),
        JobStatus::Failed => Some(EVENT_JOB_FAILED),
        JobStatus::Timeout => Some(EVENT_JOB_TIMEOUT),
        JobStatus::RetryScheduled => Some(EVENT_JOB_RETRY_SCHEDULED),
        JobStatus::Cancelled => Some(EVENT_JOB_CANCELLED),
        JobStatus::Processing => Some(EVENT_JOB_RESUBMITTED),
        JobStatus::Pending => None,
    }
}

/// Status a job is left in by an outcome event. `None` for events that
/// do not name a single resting status.
pub fn status_for_event(event_type: &str) -> Option<JobStatus> {
    match event_type {
        EVENT_JOB_COMPLETED => Some(JobStatus::Completed),
        EVENT_JOB_FAILED => Some(JobStatus::Failed),
        EVENT_JOB_TIMEOUT => Some(JobStatus::Timeout),
        EVENT_JOB_RETRY_SCHEDULED => Some(JobStatus::RetryScheduled),
        EVENT_JOB_CANCELLED => Some(JobStatus::Cancelled),
        _ => None,
    }
}

/// WebSocket message type for a bus event name.
pub fn ws_type_for_event(event_type: &str) -> Option<&'static str> {
    match event_type {
        EVENT_JOB_COMPLETED => Some(MSG_TYPE_JOB_COMPLETED),
        EVENT_JOB_FAILED => Some(MSG_TYPE_JOB_FAILED),
        EVENT_JOB_TIMEOUT => Some(MSG_TYPE_JOB_TIMEOUT),
        EVENT_JOB_RETRY_SCHEDULED => Some(MSG_TYPE_JOB_RETRY_SCHEDULED),
        EVENT_JOB_RESUBMITTED => Some(MSG_TYPE_JOB_RESUBMITTED),
        EVENT_JOB_CANCELLED => Some(MSG_TYPE_JOB_CANCELLED),
        _ => None,
    }
}
