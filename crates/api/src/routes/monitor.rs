use axum::routing::get;
use axum::Router;

use crate::handlers::monitor;
use crate::state::AppState;

/// Routes mounted at `/monitor`.
pub fn router() -> Router<AppState> {
    Router::new().route("/status", get(monitor::monitor_status))
}
