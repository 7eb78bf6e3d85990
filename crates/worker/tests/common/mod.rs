//! Shared fixtures for worker integration tests: an in-memory ComfyUI and
//! helpers to wire a monitor against a test database.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use renderwatch_comfyui::{
    ComfyUIApiError, ComfyUIBackend, HistoryEntry, QueueSnapshot, SubmitResponse,
};
use renderwatch_core::retry::RetryPolicy;
use renderwatch_db::models::production_job::CreateProductionJob;
use renderwatch_db::repositories::ProductionJobRepo;
use renderwatch_events::EventBus;
use renderwatch_worker::{CompletionMonitor, JobSubmitter, MonitorSettings, MonitorStats, OutputVerifier};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Fake ComfyUI
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    reachable: bool,
    history: HashMap<String, HistoryEntry>,
    queue: QueueSnapshot,
    /// Replaces `queue` once the current one has been read.
    queue_after_read: Option<QueueSnapshot>,
    undecodable_history: HashSet<String>,
    /// History lookups left before ComfyUI goes away.
    history_budget: Option<usize>,
    next_prompts: VecDeque<Result<String, u16>>,
    submitted: Vec<serde_json::Value>,
    cancelled: Vec<String>,
    interrupted: Vec<String>,
}

/// Scriptable stand-in for a ComfyUI server.
#[derive(Clone)]
pub struct FakeComfyUI {
    state: Arc<Mutex<FakeState>>,
}

impl FakeComfyUI {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                reachable: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unwrap().reachable = reachable;
    }

    /// Record a history entry from raw ComfyUI JSON.
    pub fn set_history(&self, prompt_id: &str, entry: serde_json::Value) {
        let entry: HistoryEntry = serde_json::from_value(entry).unwrap();
        self.state
            .lock()
            .unwrap()
            .history
            .insert(prompt_id.to_string(), entry);
    }

    pub fn set_queue(&self, running: &[&str], pending: &[&str]) {
        self.state.lock().unwrap().queue = snapshot(running, pending);
    }

    /// The queue as it will look after the next `/queue` read.
    pub fn queue_changes_after_read(&self, running: &[&str], pending: &[&str]) {
        self.state.lock().unwrap().queue_after_read = Some(snapshot(running, pending));
    }

    /// `/history` for this prompt returns a body that does not parse.
    pub fn garble_history(&self, prompt_id: &str) {
        self.state
            .lock()
            .unwrap()
            .undecodable_history
            .insert(prompt_id.to_string());
    }

    /// ComfyUI answers `lookups` history requests, then goes down.
    pub fn go_down_after_history_lookups(&self, lookups: usize) {
        self.state.lock().unwrap().history_budget = Some(lookups);
    }

    /// Next `submit` returns this prompt id.
    pub fn accept_next(&self, prompt_id: &str) {
        self.state
            .lock()
            .unwrap()
            .next_prompts
            .push_back(Ok(prompt_id.to_string()));
    }

    /// Next `submit` fails with this HTTP status.
    pub fn reject_next(&self, status: u16) {
        self.state.lock().unwrap().next_prompts.push_back(Err(status));
    }

    pub fn submitted(&self) -> usize {
        self.state.lock().unwrap().submitted.len()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// Prompts actually stopped by `/interrupt`.
    pub fn interrupted(&self) -> Vec<String> {
        self.state.lock().unwrap().interrupted.clone()
    }

    fn unavailable() -> ComfyUIApiError {
        ComfyUIApiError::ApiError {
            status: 503,
            body: "unavailable".into(),
        }
    }
}

#[async_trait]
impl ComfyUIBackend for FakeComfyUI {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(Self::unavailable());
        }
        state.submitted.push(workflow.clone());
        match state.next_prompts.pop_front() {
            Some(Ok(prompt_id)) => Ok(SubmitResponse {
                prompt_id,
                number: state.submitted.len() as i32,
            }),
            Some(Err(status)) => Err(ComfyUIApiError::ApiError {
                status,
                body: r#"{"node_errors":{}}"#.into(),
            }),
            None => Ok(SubmitResponse {
                prompt_id: format!("auto-{}", state.submitted.len()),
                number: 0,
            }),
        }
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(budget) = state.history_budget.as_mut() {
            if *budget == 0 {
                state.reachable = false;
            } else {
                *budget -= 1;
            }
        }
        if !state.reachable {
            return Err(Self::unavailable());
        }
        if state.undecodable_history.contains(prompt_id) {
            return Err(ComfyUIApiError::Decode("expected an object".into()));
        }
        Ok(state.history.get(prompt_id).cloned())
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let mut state = self.state.lock().unwrap();
        if !state.reachable {
            return Err(Self::unavailable());
        }
        let current = state.queue.clone();
        if let Some(next) = state.queue_after_read.take() {
            state.queue = next;
        }
        Ok(current)
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.state
            .lock()
            .unwrap()
            .cancelled
            .push(prompt_id.to_string());
        Ok(())
    }

    /// Like ComfyUI, only stops the prompt if it is the one running.
    async fn interrupt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let mut state = self.state.lock().unwrap();
        if state.queue.running.iter().any(|running| running == prompt_id) {
            state.queue.running.retain(|running| running != prompt_id);
            state.interrupted.push(prompt_id.to_string());
        }
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        self.state.lock().unwrap().reachable
    }
}

fn snapshot(running: &[&str], pending: &[&str]) -> QueueSnapshot {
    QueueSnapshot {
        running: running.iter().map(|s| s.to_string()).collect(),
        pending: pending.iter().map(|s| s.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub comfyui: FakeComfyUI,
    pub bus: Arc<EventBus>,
    pub stats: Arc<MonitorStats>,
    pub submitter: Arc<JobSubmitter>,
    pub monitor: CompletionMonitor,
}

pub fn settings() -> MonitorSettings {
    MonitorSettings {
        retry: RetryPolicy {
            base_delay: std::time::Duration::from_secs(30),
            ..RetryPolicy::default()
        },
        ..MonitorSettings::default()
    }
}

pub fn harness(pool: &PgPool, output_dir: &Path) -> Harness {
    harness_with(pool, output_dir, settings())
}

pub fn harness_with(pool: &PgPool, output_dir: &Path, settings: MonitorSettings) -> Harness {
    let comfyui = FakeComfyUI::new();
    let backend: Arc<dyn ComfyUIBackend> = Arc::new(comfyui.clone());
    let bus = Arc::new(EventBus::default());
    let stats = Arc::new(MonitorStats::new());
    let submitter = Arc::new(JobSubmitter::new(
        pool.clone(),
        Arc::clone(&backend),
        Arc::clone(&bus),
        settings.retry.clone(),
        "test-client".into(),
    ));
    let monitor = CompletionMonitor::new(
        pool.clone(),
        backend,
        Arc::clone(&bus),
        Arc::clone(&submitter),
        OutputVerifier::new(output_dir),
        settings,
        Arc::clone(&stats),
    );
    Harness {
        comfyui,
        bus,
        stats,
        submitter,
        monitor,
    }
}

pub fn new_job(job_type: &str, max_retries: Option<i32>) -> CreateProductionJob {
    CreateProductionJob {
        project_id: Some(1),
        character_id: Some(2),
        job_type: job_type.to_string(),
        workflow: serde_json::json!({"3": {"class_type": "KSampler", "inputs": {"seed": 1}}}),
        max_retries,
    }
}

/// Insert a job and move it to `processing` on `prompt_id`.
pub async fn processing_job(pool: &PgPool, prompt_id: &str, max_retries: Option<i32>) -> i64 {
    let job = ProductionJobRepo::create(pool, &new_job("image", max_retries), 3)
        .await
        .unwrap();
    assert!(ProductionJobRepo::mark_submitted(pool, job.id, prompt_id)
        .await
        .unwrap());
    job.id
}

/// Pretend the job was submitted `secs` seconds ago.
pub async fn backdate_submission(pool: &PgPool, job_id: i64, secs: i64) {
    sqlx::query(
        "UPDATE production_jobs SET submitted_at = NOW() - make_interval(secs => $2) WHERE id = $1",
    )
    .bind(job_id)
    .bind(secs as f64)
    .execute(pool)
    .await
    .unwrap();
}

pub fn success_history(files: &[(&str, &str)]) -> serde_json::Value {
    let images: Vec<serde_json::Value> = files
        .iter()
        .map(|(subfolder, filename)| {
            serde_json::json!({"filename": filename, "subfolder": subfolder, "type": "output"})
        })
        .collect();
    serde_json::json!({
        "status": {"status_str": "success", "completed": true, "messages": []},
        "outputs": {"9": {"images": images}}
    })
}

pub fn error_history(message: &str) -> serde_json::Value {
    serde_json::json!({
        "status": {
            "status_str": "error",
            "completed": false,
            "messages": [["execution_error", {"exception_message": message, "exception_type": ""}]]
        },
        "outputs": {}
    })
}
