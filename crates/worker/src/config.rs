//! Monitor configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use renderwatch_core::completion::DEFAULT_LOST_GRACE;
use renderwatch_core::retry::RetryPolicy;
use renderwatch_core::timeout::TimeoutPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Tunables for the completion monitor itself.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Time between monitor cycles.
    pub poll_interval: Duration,
    /// Maximum processing jobs checked (and retries claimed) per cycle.
    pub batch_size: i64,
    /// How long a prompt may be absent from both history and queue right
    /// after submission before it is treated as lost.
    pub lost_grace: Duration,
    /// Pending jobs untouched for this long are reclaimed for submission.
    pub stale_pending_after: Duration,
    pub retry: RetryPolicy,
    pub timeout: TimeoutPolicy,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 50,
            lost_grace: DEFAULT_LOST_GRACE,
            stale_pending_after: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            timeout: TimeoutPolicy::default(),
        }
    }
}

/// Full worker configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub database_url: String,
    /// ComfyUI HTTP base URL; the WebSocket URL is derived from it.
    pub comfyui_url: String,
    /// ComfyUI's output directory as mounted on this host.
    pub output_dir: PathBuf,
    /// Downstream orchestrator webhook; unset means log-only.
    pub notify_webhook_url: Option<String>,
    pub settings: MonitorSettings,
}

impl MonitorConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `DATABASE_URL`               | required                 |
    /// | `COMFYUI_URL`                | `http://127.0.0.1:8188`  |
    /// | `COMFYUI_OUTPUT_DIR`         | `/mnt/comfyui/output`    |
    /// | `MONITOR_POLL_INTERVAL_SECS` | `10`                     |
    /// | `MONITOR_BATCH_SIZE`         | `50`                     |
    /// | `MONITOR_LOST_GRACE_SECS`    | `60`                     |
    /// | `MONITOR_STALE_PENDING_SECS` | `300`                    |
    /// | `JOB_TIMEOUT_SECS`           | `1800`                   |
    /// | `JOB_TIMEOUT_OVERRIDES`      | `image=600,video=3600`   |
    /// | `RETRY_MAX_ATTEMPTS`         | `3`                      |
    /// | `RETRY_BASE_DELAY_SECS`      | `30`                     |
    /// | `RETRY_MAX_DELAY_SECS`       | `600`                    |
    /// | `NOTIFY_WEBHOOK_URL`         | unset                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let comfyui_url = get("COMFYUI_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8188".into())
            .trim_end_matches('/')
            .to_string();
        let output_dir = PathBuf::from(
            get("COMFYUI_OUTPUT_DIR").unwrap_or_else(|| "/mnt/comfyui/output".into()),
        );

        let poll_interval = secs(&get, "MONITOR_POLL_INTERVAL_SECS", 10)?;
        let batch_size = parse::<i64>(&get, "MONITOR_BATCH_SIZE", 50)?;
        if !(1..=1000).contains(&batch_size) {
            return Err(ConfigError::Invalid {
                var: "MONITOR_BATCH_SIZE",
                reason: "must be between 1 and 1000".into(),
            });
        }
        let lost_grace = secs(&get, "MONITOR_LOST_GRACE_SECS", 60)?;
        let stale_pending_after = secs(&get, "MONITOR_STALE_PENDING_SECS", 300)?;

        let default_timeout = secs(&get, "JOB_TIMEOUT_SECS", 1800)?;
        let overrides =
            get("JOB_TIMEOUT_OVERRIDES").unwrap_or_else(|| "image=600,video=3600".into());
        let timeout =
            TimeoutPolicy::from_parts(default_timeout, &overrides).map_err(|e| {
                ConfigError::Invalid {
                    var: "JOB_TIMEOUT_OVERRIDES",
                    reason: e.to_string(),
                }
            })?;

        let max_retries = parse::<i32>(&get, "RETRY_MAX_ATTEMPTS", 3)?;
        if !(0..=10).contains(&max_retries) {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_ATTEMPTS",
                reason: "must be between 0 and 10".into(),
            });
        }
        let base_delay = secs(&get, "RETRY_BASE_DELAY_SECS", 30)?;
        let max_delay = secs(&get, "RETRY_MAX_DELAY_SECS", 600)?;
        if max_delay < base_delay {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_DELAY_SECS",
                reason: "must not be less than RETRY_BASE_DELAY_SECS".into(),
            });
        }
        let retry = RetryPolicy {
            max_retries,
            base_delay,
            max_delay,
            ..RetryPolicy::default()
        };

        Ok(Self {
            database_url,
            comfyui_url,
            output_dir,
            notify_webhook_url: get("NOTIFY_WEBHOOK_URL"),
            settings: MonitorSettings {
                poll_interval,
                batch_size,
                lost_grace,
                stale_pending_after,
                retry,
                timeout,
            },
        })
    }
}

fn parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            reason: format!("'{raw}' is not a valid number"),
        }),
    }
}

/// Positive whole seconds.
fn secs(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let value = parse::<u64>(get, var, default)?;
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<MonitorConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/rw")]).unwrap();
        assert_eq!(config.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(config.output_dir, PathBuf::from("/mnt/comfyui/output"));
        assert!(config.notify_webhook_url.is_none());

        let s = &config.settings;
        assert_eq!(s.poll_interval, Duration::from_secs(10));
        assert_eq!(s.batch_size, 50);
        assert_eq!(s.lost_grace, Duration::from_secs(60));
        assert_eq!(s.retry, RetryPolicy::default());
        assert_eq!(s.timeout.timeout_for("image"), Duration::from_secs(600));
        assert_eq!(s.timeout.timeout_for("video"), Duration::from_secs(3600));
        assert_eq!(s.timeout.timeout_for("audio"), Duration::from_secs(1800));
    }

    #[test]
    fn database_url_is_required() {
        assert_matches!(load(&[]), Err(ConfigError::Missing("DATABASE_URL")));
        assert_matches!(
            load(&[("DATABASE_URL", "  ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("DATABASE_URL", "postgres://x"),
            ("COMFYUI_URL", "http://gpu:8188/"),
            ("JOB_TIMEOUT_SECS", "900"),
            ("JOB_TIMEOUT_OVERRIDES", "upscale=120"),
            ("RETRY_MAX_ATTEMPTS", "5"),
            ("NOTIFY_WEBHOOK_URL", "http://orchestrator/hooks"),
        ])
        .unwrap();
        assert_eq!(config.comfyui_url, "http://gpu:8188");
        assert_eq!(config.settings.retry.max_retries, 5);
        assert_eq!(
            config.settings.timeout.timeout_for("upscale"),
            Duration::from_secs(120)
        );
        assert_eq!(
            config.settings.timeout.timeout_for("image"),
            Duration::from_secs(900)
        );
        assert_eq!(
            config.notify_webhook_url.as_deref(),
            Some("http://orchestrator/hooks")
        );
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = load(&[("DATABASE_URL", "x"), ("MONITOR_BATCH_SIZE", "lots")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MONITOR_BATCH_SIZE", .. });

        let err = load(&[("DATABASE_URL", "x"), ("MONITOR_POLL_INTERVAL_SECS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "MONITOR_POLL_INTERVAL_SECS", .. });

        let err = load(&[("DATABASE_URL", "x"), ("JOB_TIMEOUT_OVERRIDES", "image")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "JOB_TIMEOUT_OVERRIDES", .. });

        let err = load(&[
            ("DATABASE_URL", "x"),
            ("RETRY_BASE_DELAY_SECS", "60"),
            ("RETRY_MAX_DELAY_SECS", "30"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "RETRY_MAX_DELAY_SECS", .. });
    }
}
