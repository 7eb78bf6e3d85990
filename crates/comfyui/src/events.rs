//! Progress events derived from the ComfyUI WebSocket stream.
//!
//! These carry only ComfyUI identifiers; mapping a prompt to a production
//! job happens downstream.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// ComfyUI began executing a prompt.
    Started { prompt_id: String },

    /// Step progress inside the prompt.
    Progress {
        prompt_id: String,
        /// Completion percentage (0-100).
        percent: i16,
        node: Option<String>,
    },

    NodeExecuted { prompt_id: String, node: String },

    /// All nodes ran; history should now hold the outputs.
    Finished { prompt_id: String },

    Failed { prompt_id: String, error: String },

    /// Prompts remaining in the ComfyUI queue.
    QueueDepth { remaining: i32 },
}

impl ProgressEvent {
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::Started { prompt_id }
            | ProgressEvent::Progress { prompt_id, .. }
            | ProgressEvent::NodeExecuted { prompt_id, .. }
            | ProgressEvent::Finished { prompt_id }
            | ProgressEvent::Failed { prompt_id, .. } => Some(prompt_id),
            ProgressEvent::QueueDepth { .. } => None,
        }
    }
}
