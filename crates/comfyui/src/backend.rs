//! The ComfyUI operations the monitor and submitter depend on.
//!
//! Callers hold an `Arc<dyn ComfyUIBackend>` so tests can substitute an
//! in-memory fake for a live server.

use async_trait::async_trait;

use crate::api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
use crate::history::HistoryEntry;
use crate::queue::QueueSnapshot;

#[async_trait]
pub trait ComfyUIBackend: Send + Sync {
    /// Queue a workflow; `client_id` ties WebSocket progress to this caller.
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError>;

    /// History record for a prompt, `None` if ComfyUI has none.
    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError>;

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError>;

    /// Remove a pending prompt.
    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// Stop `prompt_id` if it is the prompt currently running.
    async fn interrupt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError>;

    /// Cheap liveness check.
    async fn is_reachable(&self) -> bool;
}

#[async_trait]
impl ComfyUIBackend for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        self.get_queue().await
    }

    async fn cancel(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        self.cancel_execution(prompt_id).await
    }

    async fn interrupt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        ComfyUIApi::interrupt(self, prompt_id).await
    }

    async fn is_reachable(&self) -> bool {
        match self.system_stats().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(api_url = %self.api_url(), error = %e, "ComfyUI not reachable");
                false
            }
        }
    }
}
