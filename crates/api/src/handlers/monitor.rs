use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use renderwatch_db::repositories::ProductionJobRepo;
use renderwatch_worker::MonitorStatsSnapshot;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Serialize)]
pub struct MonitorStatus {
    /// Whether this process runs the completion monitor.
    pub enabled: bool,
    pub stats: MonitorStatsSnapshot,
    /// Job count per status name.
    pub jobs: BTreeMap<String, i64>,
    /// Prompts held by ComfyUI, `None` when it cannot be reached.
    pub comfyui_queue_depth: Option<usize>,
    pub ws_connections: usize,
}

/// GET /api/v1/monitor/status
pub async fn monitor_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = ProductionJobRepo::count_by_status(&state.pool)
        .await?
        .into_iter()
        .map(|c| (c.status, c.count))
        .collect();
    let comfyui_queue_depth = state.comfyui.queue().await.ok().map(|q| q.depth());

    Ok(Json(DataResponse {
        data: MonitorStatus {
            enabled: state.config.monitor_enabled,
            stats: state.stats.snapshot(),
            jobs,
            comfyui_queue_depth,
            ws_connections: state.progress_hub.len().await,
        },
    }))
}
