//! Typed view of ComfyUI `/history/{prompt_id}` responses.
//!
//! The endpoint returns `{}` for prompts it has never finished (or has
//! forgotten after a restart) and otherwise
//! `{"<prompt_id>": {"status": {...}, "outputs": {"<node>": {...}}}}`.
//! Output nodes list saved files under media keys such as `images`,
//! `gifs`, `videos` or `audio`; other keys (e.g. `text`) are ignored.

use renderwatch_core::outputs::OutputFile;
use serde::Deserialize;

/// Output keys whose entries are file references.
const MEDIA_KEYS: [&str; 4] = ["images", "gifs", "videos", "audio"];

/// One prompt's history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Per-node outputs keyed by node id.
    #[serde(default)]
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

/// The `status` block of a history record.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
    /// `[kind, data]` pairs such as `["execution_error", {...}]`.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Interpreted result of a history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    Success,
    Error(String),
    /// Recorded but not finished (only seen on older ComfyUI builds).
    Pending,
}

impl HistoryEntry {
    /// Interpret the status block.
    pub fn outcome(&self) -> HistoryOutcome {
        let Some(status) = &self.status else {
            // Older builds omit `status`; outputs imply success.
            return if self.outputs.is_empty() {
                HistoryOutcome::Pending
            } else {
                HistoryOutcome::Success
            };
        };

        match status.status_str.as_str() {
            "success" => HistoryOutcome::Success,
            "error" => HistoryOutcome::Error(
                status
                    .error_message()
                    .unwrap_or_else(|| "execution failed".to_string()),
            ),
            _ if status.completed => HistoryOutcome::Success,
            _ => HistoryOutcome::Pending,
        }
    }

    /// All file references across every node and media key, de-duplicated,
    /// in numeric node id order (`"9"` before `"12"`).
    pub fn output_files(&self) -> Vec<OutputFile> {
        let mut nodes: Vec<(&String, &serde_json::Value)> = self.outputs.iter().collect();
        nodes.sort_by(|(a, _), (b, _)| node_order(a).cmp(&node_order(b)));

        let mut files: Vec<OutputFile> = Vec::new();
        for (_, node_output) in nodes {
            for key in MEDIA_KEYS {
                let Some(items) = node_output.get(key).and_then(|v| v.as_array()) else {
                    continue;
                };
                for item in items {
                    match serde_json::from_value::<OutputFile>(item.clone()) {
                        Ok(file) if !files.contains(&file) => files.push(file),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "Skipping non-file output entry");
                        }
                    }
                }
            }
        }
        files
    }
}

/// Numeric ids first, by value; anything else after, by name.
fn node_order(id: &str) -> (bool, u64, &str) {
    match id.parse::<u64>() {
        Ok(n) => (false, n, id),
        Err(_) => (true, 0, id),
    }
}

impl HistoryStatus {
    /// Message from an `execution_error` (or `execution_interrupted`)
    /// status entry, if any.
    pub fn error_message(&self) -> Option<String> {
        for message in &self.messages {
            let Some(pair) = message.as_array() else {
                continue;
            };
            let kind = pair.first().and_then(|k| k.as_str());
            let data = pair.get(1);
            match kind {
                Some("execution_error") => {
                    let text = data
                        .and_then(|d| d.get("exception_message"))
                        .and_then(|m| m.as_str())
                        .map(str::trim)
                        .unwrap_or("execution failed");
                    let exception_type = data
                        .and_then(|d| d.get("exception_type"))
                        .and_then(|t| t.as_str());
                    return Some(match exception_type {
                        Some(t) if !t.is_empty() => format!("{t}: {text}"),
                        _ => text.to_string(),
                    });
                }
                Some("execution_interrupted") => {
                    return Some("execution interrupted".to_string());
                }
                _ => {}
            }
        }
        None
    }
}

/// Extract the record for `prompt_id` from a raw history response.
///
/// Returns `Ok(None)` when ComfyUI has no record of the prompt.
pub fn parse_history(
    prompt_id: &str,
    body: &serde_json::Value,
) -> Result<Option<HistoryEntry>, serde_json::Error> {
    match body.get(prompt_id) {
        Some(entry) => serde_json::from_value(entry.clone()).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(value: serde_json::Value) -> HistoryEntry {
        parse_history("p1", &json!({ "p1": value })).unwrap().unwrap()
    }

    #[test]
    fn empty_body_means_unknown_prompt() {
        assert!(parse_history("p1", &json!({})).unwrap().is_none());
    }

    #[test]
    fn success_with_images_and_gifs() {
        let e = entry(json!({
            "status": {"status_str": "success", "completed": true, "messages": []},
            "outputs": {
                "9": {"images": [{"filename": "a.png", "subfolder": "", "type": "output"}]},
                "12": {"gifs": [{"filename": "clip.mp4", "subfolder": "ep1", "type": "output"}],
                       "text": ["ignored"]}
            }
        }));
        assert_eq!(e.outcome(), HistoryOutcome::Success);
        let names: Vec<String> = e.output_files().iter().map(|f| f.relative_path()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.png".to_string()));
        assert!(names.contains(&"ep1/clip.mp4".to_string()));
    }

    #[test]
    fn files_follow_numeric_node_order() {
        let e = entry(json!({
            "status": {"status_str": "success", "completed": true},
            "outputs": {
                "12": {"images": [{"filename": "twelve.png"}]},
                "9": {"images": [{"filename": "nine.png"}]},
                "100": {"images": [{"filename": "hundred.png"}]},
                "save": {"images": [{"filename": "named.png"}]}
            }
        }));
        let names: Vec<String> = e.output_files().iter().map(|f| f.filename.clone()).collect();
        assert_eq!(names, vec!["nine.png", "twelve.png", "hundred.png", "named.png"]);
    }

    #[test]
    fn duplicate_files_are_collapsed() {
        let file = json!({"filename": "a.png", "subfolder": "", "type": "output"});
        let e = entry(json!({
            "status": {"status_str": "success", "completed": true},
            "outputs": {"1": {"images": [file.clone()]}, "2": {"images": [file]}}
        }));
        assert_eq!(e.output_files().len(), 1);
    }

    #[test]
    fn error_message_comes_from_execution_error() {
        let e = entry(json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", {"prompt_id": "p1"}],
                    ["execution_error", {
                        "prompt_id": "p1",
                        "node_id": "3",
                        "exception_type": "torch.OutOfMemoryError",
                        "exception_message": "CUDA out of memory\n"
                    }]
                ]
            },
            "outputs": {}
        }));
        assert_eq!(
            e.outcome(),
            HistoryOutcome::Error("torch.OutOfMemoryError: CUDA out of memory".into())
        );
    }

    #[test]
    fn interrupted_prompt_is_an_error() {
        let e = entry(json!({
            "status": {
                "status_str": "error",
                "messages": [["execution_interrupted", {"prompt_id": "p1"}]]
            }
        }));
        assert_eq!(
            e.outcome(),
            HistoryOutcome::Error("execution interrupted".into())
        );
    }

    #[test]
    fn error_without_messages_has_generic_text() {
        let e = entry(json!({"status": {"status_str": "error"}}));
        assert_eq!(e.outcome(), HistoryOutcome::Error("execution failed".into()));
    }

    #[test]
    fn missing_status_uses_outputs() {
        let done = entry(json!({"outputs": {"9": {"images": [{"filename": "a.png"}]}}}));
        assert_eq!(done.outcome(), HistoryOutcome::Success);

        let pending = entry(json!({"outputs": {}}));
        assert_eq!(pending.outcome(), HistoryOutcome::Pending);
    }

    #[test]
    fn malformed_items_are_skipped() {
        let e = entry(json!({
            "status": {"status_str": "success", "completed": true},
            "outputs": {"9": {"images": ["not-an-object", {"filename": "ok.png"}]}}
        }));
        let files = e.output_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "ok.png");
    }
}
