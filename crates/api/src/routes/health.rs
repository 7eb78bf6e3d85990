use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    /// Postgres or ComfyUI did not answer.
    Degraded,
}

#[derive(Serialize)]
pub struct HealthReport {
    pub status: Health,
    pub version: &'static str,
    pub db_healthy: bool,
    pub comfyui_reachable: bool,
}

/// GET /health -- checks Postgres and ComfyUI concurrently.
///
/// Always 200; callers read `status` to tell a degraded service apart.
async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    let (db, comfyui_reachable) = tokio::join!(
        renderwatch_db::health_check(&state.pool),
        state.comfyui.is_reachable(),
    );
    let db_healthy = db.is_ok();

    Json(HealthReport {
        status: if db_healthy && comfyui_reachable {
            Health::Ok
        } else {
            Health::Degraded
        },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        comfyui_reachable,
    })
}

/// `/health`, mounted outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
