//! Typed view of the ComfyUI `/queue` endpoint.
//!
//! ComfyUI reports `{"queue_running": [...], "queue_pending": [...]}` where
//! each item is `[number, prompt_id, prompt, extra_data, outputs_to_execute]`.
//! Only the prompt id is kept.

use serde::Deserialize;

/// Where a prompt currently sits in the ComfyUI queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Running,
    /// Zero-based index among pending prompts, ordered by queue number.
    Pending(usize),
}

/// Prompt ids currently running and waiting in ComfyUI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawQueue {
    #[serde(default)]
    queue_running: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    queue_pending: Vec<Vec<serde_json::Value>>,
}

impl QueueSnapshot {
    /// Parse a raw `/queue` response body.
    pub fn from_value(body: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawQueue = serde_json::from_value(body)?;

        // Pending items are not guaranteed to arrive in queue order.
        let mut pending: Vec<(i64, String)> = raw
            .queue_pending
            .iter()
            .filter_map(|item| {
                let number = item.first().and_then(|n| n.as_i64()).unwrap_or(i64::MAX);
                prompt_id_of(item).map(|id| (number, id))
            })
            .collect();
        pending.sort_by_key(|(number, _)| *number);

        Ok(Self {
            running: raw.queue_running.iter().filter_map(|i| prompt_id_of(i)).collect(),
            pending: pending.into_iter().map(|(_, id)| id).collect(),
        })
    }

    /// Position of `prompt_id`, or `None` if ComfyUI is not holding it.
    pub fn position(&self, prompt_id: &str) -> Option<QueuePosition> {
        if self.running.iter().any(|id| id == prompt_id) {
            return Some(QueuePosition::Running);
        }
        self.pending
            .iter()
            .position(|id| id == prompt_id)
            .map(QueuePosition::Pending)
    }

    /// Total prompts held by ComfyUI.
    pub fn depth(&self) -> usize {
        self.running.len() + self.pending.len()
    }
}

fn prompt_id_of(item: &[serde_json::Value]) -> Option<String> {
    item.get(1).and_then(|v| v.as_str()).map(str::to_string)
}
