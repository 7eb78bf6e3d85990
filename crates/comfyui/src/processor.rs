//! WebSocket message processing loop.
//!
//! Reads frames from a ComfyUI connection, parses them into
//! [`ComfyUIMessage`]s and emits [`ProgressEvent`]s on a broadcast
//! channel. No persistence happens here; the relay and monitor decide what
//! an event means for a job.

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::events::ProgressEvent;
use crate::messages::{parse_message, ComfyUIMessage};

/// Per-connection interpretation state.
#[derive(Debug, Default)]
pub struct FrameInterpreter {
    /// Prompt most recently started on this connection; attributed to
    /// `progress` frames that lack a `prompt_id`.
    current_prompt: Option<String>,
    /// Last prompt a `Finished` was emitted for, so `execution_success`
    /// followed by `executing {node: null}` yields one event.
    last_finished: Option<String>,
}

impl FrameInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn one text frame into zero or more events.
    pub fn interpret(&mut self, text: &str) -> Vec<ProgressEvent> {
        let msg = match parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                // Custom nodes broadcast their own message types.
                tracing::debug!(error = %e, raw_message = %text, "Unhandled ComfyUI message");
                return Vec::new();
            }
        };

        match msg {
            ComfyUIMessage::Status(data) => vec![ProgressEvent::QueueDepth {
                remaining: data.status.exec_info.queue_remaining,
            }],
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution started");
                self.current_prompt = Some(data.prompt_id.clone());
                vec![ProgressEvent::Started {
                    prompt_id: data.prompt_id,
                }]
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, cached = data.nodes.len(), "Execution used cache");
                Vec::new()
            }
            ComfyUIMessage::Progress(data) => {
                let Some(prompt_id) = data.prompt_id.clone().or_else(|| self.current_prompt.clone())
                else {
                    tracing::trace!("Progress frame with no known prompt");
                    return Vec::new();
                };
                vec![ProgressEvent::Progress {
                    prompt_id,
                    percent: data.percent(),
                    node: data.node,
                }]
            }
            ComfyUIMessage::Executing(data) => match (data.node, data.prompt_id) {
                (Some(node), prompt_id) => {
                    tracing::trace!(prompt_id = ?prompt_id, node = %node, "Executing node");
                    Vec::new()
                }
                (None, Some(prompt_id)) => self.finish(prompt_id),
                (None, None) => Vec::new(),
            },
            ComfyUIMessage::Executed(data) => vec![ProgressEvent::NodeExecuted {
                prompt_id: data.prompt_id,
                node: data.node,
            }],
            ComfyUIMessage::ExecutionSuccess(data) => self.finish(data.prompt_id),
            ComfyUIMessage::ExecutionError(data) => {
                tracing::warn!(
                    prompt_id = %data.prompt_id,
                    node_id = ?data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                self.clear(&data.prompt_id);
                let error = if data.exception_type.is_empty() {
                    data.exception_message.trim().to_string()
                } else {
                    format!("{}: {}", data.exception_type, data.exception_message.trim())
                };
                vec![ProgressEvent::Failed {
                    prompt_id: data.prompt_id,
                    error,
                }]
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                self.clear(&data.prompt_id);
                vec![ProgressEvent::Failed {
                    prompt_id: data.prompt_id,
                    error: "execution interrupted".to_string(),
                }]
            }
        }
    }

    fn finish(&mut self, prompt_id: String) -> Vec<ProgressEvent> {
        self.clear(&prompt_id);
        if self.last_finished.as_deref() == Some(prompt_id.as_str()) {
            return Vec::new();
        }
        tracing::info!(prompt_id = %prompt_id, "Execution finished");
        self.last_finished = Some(prompt_id.clone());
        vec![ProgressEvent::Finished { prompt_id }]
    }

    fn clear(&mut self, prompt_id: &str) {
        if self.current_prompt.as_deref() == Some(prompt_id) {
            self.current_prompt = None;
        }
    }
}

/// Process frames until the socket closes, errors, or the stream ends.
///
/// Binary frames (preview images) are ignored.
pub async fn process_messages<S>(ws_stream: &mut S, event_tx: &broadcast::Sender<ProgressEvent>)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut interpreter = FrameInterpreter::new();

    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                for event in interpreter.interpret(&text) {
                    // No receivers is fine; the relay may not be running.
                    let _ = event_tx.send(event);
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                break;
            }
        }
    }
}
