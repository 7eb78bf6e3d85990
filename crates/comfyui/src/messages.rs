//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON frames shaped `{"type": "<kind>", "data": {...}}`.

use serde::Deserialize;

/// Known ComfyUI WebSocket message kinds.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    #[serde(rename = "status")]
    Status(StatusData),

    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Nodes skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node is executing; `node == None` means the prompt finished.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Step progress from a long-running node (e.g. KSampler).
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only a prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: Option<String>,
}

/// Step-level progress. Older ComfyUI builds omit `prompt_id` and `node`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Whole-number percentage in `0..=100`.
    pub fn percent(&self) -> i16 {
        if self.max <= 0 {
            return 0;
        }
        let pct = (self.value as f64 / self.max as f64) * 100.0;
        pct.clamp(0.0, 100.0) as i16
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    #[serde(default)]
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Parse a text frame. Unknown `type` values are errors; callers log and
/// continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
