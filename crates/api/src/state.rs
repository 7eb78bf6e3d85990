use std::sync::Arc;

use renderwatch_comfyui::ComfyUIBackend;
use renderwatch_worker::{JobSubmitter, MonitorStats};

use crate::config::ServerConfig;
use crate::ws::ProgressHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: renderwatch_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Open `/ws` progress-stream sessions.
    pub progress_hub: Arc<ProgressHub>,
    /// Centralized event bus for job lifecycle events.
    pub event_bus: Arc<renderwatch_events::EventBus>,
    /// ComfyUI REST API (health check, cancellation).
    pub comfyui: Arc<dyn ComfyUIBackend>,
    /// Submits newly created jobs straight away.
    pub submitter: Arc<JobSubmitter>,
    /// Counters of the embedded monitor (all zero when it is disabled).
    pub stats: Arc<MonitorStats>,
}
