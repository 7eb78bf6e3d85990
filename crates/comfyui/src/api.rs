//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, history and queue inspection, cancellation,
//! interruption and the `/system_stats` reachability check using
//! [`reqwest`].

use std::time::Duration;

use serde::Deserialize;

use crate::history::{parse_history, HistoryEntry};
use crate::queue::QueueSnapshot;

/// Per-request timeout for ComfyUI HTTP calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code. Workflow validation
    /// failures arrive here as a 400 with a `node_errors` body.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The body was JSON but not the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    Decode(String),
}

impl ComfyUIApiError {
    /// Whether ComfyUI itself could not be reached or answered with a
    /// server error, as opposed to rejecting the request.
    pub fn is_unavailable(&self) -> bool {
        match self {
            ComfyUIApiError::Request(_) => true,
            ComfyUIApiError::ApiError { status, .. } => *status >= 500,
            ComfyUIApiError::Decode(_) => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self::with_client(client, api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution (`POST /prompt`).
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the history record for a prompt (`GET /history/{prompt_id}`).
    ///
    /// Returns `Ok(None)` when ComfyUI has no record of the prompt, which
    /// is normal while it is still queued or running.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        parse_history(prompt_id, &body).map_err(|e| ComfyUIApiError::Decode(e.to_string()))
    }

    /// Snapshot of running and pending prompts (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueSnapshot, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .send()
            .await?;

        let body: serde_json::Value = Self::parse_response(response).await?;
        QueueSnapshot::from_value(body).map_err(|e| ComfyUIApiError::Decode(e.to_string()))
    }

    /// Remove a pending prompt from the queue (`POST /queue`).
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt `prompt_id` if it is the one executing (`POST /interrupt`
    /// with a `prompt_id` body). ComfyUI ignores the request when a
    /// different prompt is running.
    pub async fn interrupt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({ "prompt_id": prompt_id });
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Device and version information (`GET /system_stats`).
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Return the response unchanged on success, or an
    /// [`ComfyUIApiError::ApiError`] carrying status and body text.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ComfyUIApiError::Decode(e.to_string()))
    }

    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::history::HistoryOutcome;
    use crate::queue::QueuePosition;

    async fn api_for(server: &MockServer) -> ComfyUIApi {
        ComfyUIApi::new(server.uri())
    }

    #[tokio::test]
    async fn submit_returns_prompt_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prompt_id": "p-1", "number": 7, "node_errors": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = api_for(&server).await;
        let resp = api
            .submit_workflow(&json!({"1": {"class_type": "KSampler"}}), "client-a")
            .await
            .unwrap();
        assert_eq!(resp.prompt_id, "p-1");
        assert_eq!(resp.number, 7);
    }

    #[tokio::test]
    async fn submit_validation_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "prompt_outputs_failed_validation"},
                "node_errors": {"3": {}}
            })))
            .mount(&server)
            .await;

        let err = api_for(&server)
            .await
            .submit_workflow(&json!({}), "c")
            .await
            .unwrap_err();
        assert_matches!(err, ComfyUIApiError::ApiError { status: 400, ref body } if body.contains("node_errors"));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn history_unknown_prompt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/p-404"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let entry = api_for(&server).await.get_history("p-404").await.unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn history_success_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "p-1": {
                    "status": {"status_str": "success", "completed": true, "messages": []},
                    "outputs": {"9": {"images": [{"filename": "x.png", "subfolder": "", "type": "output"}]}}
                }
            })))
            .mount(&server)
            .await;

        let entry = api_for(&server)
            .await
            .get_history("p-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.outcome(), HistoryOutcome::Success);
        assert_eq!(entry.output_files().len(), 1);
    }

    #[tokio::test]
    async fn queue_snapshot_is_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "queue_running": [[1, "run", {}, {}, []]],
                "queue_pending": [[2, "wait", {}, {}, []]]
            })))
            .mount(&server)
            .await;

        let queue = api_for(&server).await.get_queue().await.unwrap();
        assert_eq!(queue.position("run"), Some(QueuePosition::Running));
        assert_eq!(queue.position("wait"), Some(QueuePosition::Pending(0)));
    }

    #[tokio::test]
    async fn cancel_sends_delete_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue"))
            .and(body_json(json!({"delete": ["p-9"]})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server).await.cancel_execution("p-9").await.unwrap();
    }

    #[tokio::test]
    async fn interrupt_names_the_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interrupt"))
            .and(body_json(json!({"prompt_id": "p-7"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api_for(&server).await.interrupt("p-7").await.unwrap();
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/interrupt"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = api_for(&server).await.interrupt("p-1").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn garbage_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = api_for(&server).await.get_queue().await.unwrap_err();
        assert_matches!(err, ComfyUIApiError::Decode(_));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let api = ComfyUIApi::new("http://127.0.0.1:1".into());
        let err = api.system_stats().await.unwrap_err();
        assert_matches!(err, ComfyUIApiError::Request(_));
        assert!(err.is_unavailable());
    }
}
