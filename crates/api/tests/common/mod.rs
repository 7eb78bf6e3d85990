#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use renderwatch_comfyui::{
    ComfyUIApiError, ComfyUIBackend, HistoryEntry, QueueSnapshot, SubmitResponse,
};
use renderwatch_core::retry::RetryPolicy;
use renderwatch_events::EventBus;
use renderwatch_worker::{JobSubmitter, MonitorStats};
use sqlx::PgPool;
use tower::ServiceExt;

use renderwatch_api::config::ServerConfig;
use renderwatch_api::router::build_app_router;
use renderwatch_api::state::AppState;
use renderwatch_api::ws::ProgressHub;

// ---------------------------------------------------------------------------
// Fake ComfyUI
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    down: bool,
    queue: QueueSnapshot,
    submitted: usize,
    cancelled: Vec<String>,
    interrupted: Vec<String>,
}

/// ComfyUI stand-in: accepts every prompt as `prompt-N` unless marked down.
#[derive(Clone, Default)]
pub struct FakeComfyUI {
    state: Arc<Mutex<FakeState>>,
}

impl FakeComfyUI {
    pub fn set_down(&self, down: bool) {
        self.state.lock().unwrap().down = down;
    }

    pub fn set_running(&self, prompt_id: &str) {
        self.state.lock().unwrap().queue.running = vec![prompt_id.to_string()];
    }

    pub fn set_pending(&self, prompt_id: &str) {
        self.state.lock().unwrap().queue.pending = vec![prompt_id.to_string()];
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn interrupted(&self) -> Vec<String> {
        self.state.lock().unwrap().interrupted.clone()
    }

    fn check(&self) -> Result<(), ComfyUIApiError> {
        if self.state.lock().unwrap().down {
            return Err(ComfyUIApiError::ApiError {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ComfyUIBackend for FakeComfyUI {
    async fn submit(
        &self,
        _workflow: &serde_json::Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.submitted += 1;
        Ok(SubmitResponse {
            prompt_id: format!("prompt-{}", state.submitted),
            number: state.submitted as i32,
        })
    }

    async fn history(&self, _prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.check()?;
        Ok(None)
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.check()?;
        Ok(self.state.lock().unwrap().queue.clone())
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .cancelled
            .push(prompt_id.to_string());
        Ok(())
    }

    async fn interrupt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .interrupted
            .push(prompt_id.to_string());
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        !self.state.lock().unwrap().down
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        monitor_enabled: false,
    }
}

/// Everything a test may want to inspect besides the router.
pub struct TestApp {
    pub router: Router,
    pub comfyui: FakeComfyUI,
    pub event_bus: Arc<EventBus>,
    pub progress_hub: Arc<ProgressHub>,
}

/// Build the full application router, with the production middleware
/// stack, over `pool` and a fake ComfyUI.
pub fn build_test_app(pool: PgPool) -> TestApp {
    let config = test_config();
    let comfyui = FakeComfyUI::default();
    let backend: Arc<dyn ComfyUIBackend> = Arc::new(comfyui.clone());
    let event_bus = Arc::new(EventBus::default());
    let progress_hub = Arc::new(ProgressHub::new());
    let submitter = Arc::new(JobSubmitter::new(
        pool.clone(),
        Arc::clone(&backend),
        Arc::clone(&event_bus),
        RetryPolicy::default(),
        "test-client".into(),
    ));

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        progress_hub: Arc::clone(&progress_hub),
        event_bus: Arc::clone(&event_bus),
        comfyui: backend,
        submitter,
        stats: Arc::new(MonitorStats::new()),
    };

    TestApp {
        router: build_app_router(state, &config),
        comfyui,
        event_bus,
        progress_hub,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &TestApp, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(app: &TestApp, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn post(app: &TestApp, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn workflow() -> serde_json::Value {
    serde_json::json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 42, "steps": 20}},
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "rw"}}
    })
}
