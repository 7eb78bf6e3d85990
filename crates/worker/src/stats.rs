//! Running counters for the completion monitor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::Utc;
use renderwatch_core::types::Timestamp;
use serde::Serialize;

use crate::monitor::CycleReport;

/// Shared between the monitor task and the status endpoint.
#[derive(Debug, Default)]
pub struct MonitorStats {
    cycles: AtomicU64,
    skipped_cycles: AtomicU64,
    completed: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    resubmitted: AtomicU64,
    last_cycle_at: RwLock<Option<Timestamp>>,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatsSnapshot {
    pub cycles: u64,
    pub skipped_cycles: u64,
    pub completed: u64,
    pub retried: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub resubmitted: u64,
    pub last_cycle_at: Option<Timestamp>,
    pub last_error: Option<String>,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished cycle into the totals.
    pub fn record_cycle(&self, report: &CycleReport) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if report.skipped {
            self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
        }
        self.completed.fetch_add(report.completed, Ordering::Relaxed);
        self.retried.fetch_add(report.retried, Ordering::Relaxed);
        self.failed.fetch_add(report.failed, Ordering::Relaxed);
        self.timed_out.fetch_add(report.timed_out, Ordering::Relaxed);
        self.resubmitted.fetch_add(report.resubmitted, Ordering::Relaxed);
        if let Ok(mut at) = self.last_cycle_at.write() {
            *at = Some(Utc::now());
        }
    }

    pub fn record_error(&self, error: impl Into<String>) {
        if let Ok(mut last) = self.last_error.write() {
            *last = Some(error.into());
        }
    }

    /// Forget the last error once a cycle has run cleanly.
    pub fn clear_error(&self) {
        if let Ok(mut last) = self.last_error.write() {
            *last = None;
        }
    }

    pub fn snapshot(&self) -> MonitorStatsSnapshot {
        MonitorStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            resubmitted: self.resubmitted.load(Ordering::Relaxed),
            last_cycle_at: self.last_cycle_at.read().ok().and_then(|at| *at),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }
}
