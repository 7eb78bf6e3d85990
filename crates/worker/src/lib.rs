//! ComfyUI completion monitor and retry executor.
//!
//! The [`monitor::CompletionMonitor`] polls ComfyUI for the outcome of
//! every processing job, verifies outputs on disk, applies timeouts and
//! schedules retries; [`submitter::JobSubmitter`] (re)submits workflows.
//! The API server embeds the same components when `MONITOR_ENABLED` is set.

pub mod config;
pub mod event;
pub mod monitor;
pub mod stats;
pub mod submitter;
pub mod verify;

pub use config::{ConfigError, MonitorConfig, MonitorSettings};
pub use monitor::{CompletionMonitor, CycleReport, MonitorError};
pub use stats::{MonitorStats, MonitorStatsSnapshot};
pub use submitter::{JobSubmitter, SubmitError, SubmitOutcome};
pub use verify::{OutputVerifier, VerifiedOutputs};
