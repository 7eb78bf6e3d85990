//! Per-job-type execution timeouts.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::CoreError;
use crate::types::Timestamp;

/// Timeout applied to job types without an override (30 minutes).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Built-in override for still images.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Built-in override for video renders.
pub const VIDEO_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How long a submitted job may sit in ComfyUI before it is considered hung.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub default_timeout: Duration,
    pub per_type: HashMap<String, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        let per_type = HashMap::from([
            ("image".to_string(), IMAGE_TIMEOUT),
            ("video".to_string(), VIDEO_TIMEOUT),
        ]);
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            per_type,
        }
    }
}

impl TimeoutPolicy {
    /// Build a policy from a default and an override string such as
    /// `"image=600,video=3600"` (seconds).
    pub fn from_parts(default_timeout: Duration, overrides: &str) -> Result<Self, CoreError> {
        Ok(Self {
            default_timeout,
            per_type: parse_overrides(overrides)?,
        })
    }

    /// Timeout for the given job type.
    pub fn timeout_for(&self, job_type: &str) -> Duration {
        self.per_type
            .get(job_type)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    /// Whether a job submitted at `submitted_at` has run longer than its
    /// timeout. Jobs that were never submitted never time out.
    pub fn is_timed_out(
        &self,
        job_type: &str,
        submitted_at: Option<Timestamp>,
        now: Timestamp,
    ) -> bool {
        let Some(submitted_at) = submitted_at else {
            return false;
        };
        let Ok(elapsed) = (now - submitted_at).to_std() else {
            // Submission timestamp in the future (clock skew).
            return false;
        };
        elapsed > self.timeout_for(job_type)
    }
}

/// Parse `type=seconds` pairs separated by commas. Blank input yields an
/// empty map.
pub fn parse_overrides(raw: &str) -> Result<HashMap<String, Duration>, CoreError> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (job_type, secs) = pair.split_once('=').ok_or_else(|| {
            CoreError::Validation(format!("timeout override '{pair}' must be type=seconds"))
        })?;
        let job_type = job_type.trim();
        if job_type.is_empty() {
            return Err(CoreError::Validation(format!(
                "timeout override '{pair}' has an empty job type"
            )));
        }
        let secs: u64 = secs.trim().parse().map_err(|_| {
            CoreError::Validation(format!("timeout override '{pair}' has invalid seconds"))
        })?;
        if secs == 0 {
            return Err(CoreError::Validation(format!(
                "timeout override '{pair}' must be greater than zero"
            )));
        }
        map.insert(job_type.to_string(), Duration::from_secs(secs));
    }
    Ok(map)
}
