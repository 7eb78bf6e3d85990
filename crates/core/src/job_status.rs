//! Production job lifecycle states.
//!
//! Statuses are stored as snake_case text in `production_jobs.status`.
//! [`JobStatus::can_transition_to`] lists the legal moves. The job
//! repository checks it before every status-changing `UPDATE`, and the
//! `UPDATE`'s own `WHERE` clause pins the observed state so concurrent
//! monitors cannot double-process a job.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a production job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet submitted to ComfyUI.
    Pending,
    /// Submitted; ComfyUI holds a prompt for it.
    Processing,
    /// Waiting for `next_retry_at` before being claimed (back to
    /// `Pending`) and resubmitted.
    RetryScheduled,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::RetryScheduled,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Timeout,
        JobStatus::Cancelled,
    ];

    /// String representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::RetryScheduled => "retry_scheduled",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status string. Returns `None` for unknown values.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    /// Terminal statuses are never touched by the monitor again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// Whether a job in `self` may move to `next`.
    ///
    /// `Failed`, `Timeout` and `Cancelled` only leave their state through
    /// an explicit manual retry. `Completed` never leaves.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match self {
            Pending => matches!(next, Processing | Failed | RetryScheduled | Cancelled),
            Processing => matches!(
                next,
                Completed | Failed | Timeout | RetryScheduled | Cancelled
            ),
            RetryScheduled => matches!(next, Pending | Processing | Failed | Cancelled),
            Failed | Timeout | Cancelled => next == RetryScheduled,
            Completed => false,
        }
    }

    /// Statuses a manual retry may start from: terminal ones that may
    /// move back to `RetryScheduled`.
    pub fn is_manually_retryable(&self) -> bool {
        self.is_terminal() && self.can_transition_to(JobStatus::RetryScheduled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_every_status() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn parse_unknown_is_none() {
        assert_eq!(JobStatus::parse("exploded"), None);
        assert_eq!(JobStatus::parse("Processing"), None);
    }

    #[test]
    fn completed_is_final() {
        for next in JobStatus::ALL {
            assert!(!JobStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn processing_can_finish_or_retry() {
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Timeout));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::RetryScheduled));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn failed_only_leaves_through_retry() {
        assert!(JobStatus::Failed.can_transition_to(JobStatus::RetryScheduled));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn claimed_retry_goes_back_to_pending() {
        assert!(JobStatus::RetryScheduled.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Pending));
    }

    #[test]
    fn manual_retry_sources() {
        let retryable: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_manually_retryable)
            .collect();
        assert_eq!(
            retryable,
            vec![JobStatus::Failed, JobStatus::Timeout, JobStatus::Cancelled]
        );
    }

    #[test]
    fn terminal_set() {
        let terminal: Vec<_> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_terminal)
            .collect();
        assert_eq!(
            terminal,
            vec![
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Timeout,
                JobStatus::Cancelled
            ]
        );
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&JobStatus::RetryScheduled).unwrap();
        assert_eq!(json, "\"retry_scheduled\"");
    }
}
