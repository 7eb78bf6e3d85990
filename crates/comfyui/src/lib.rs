//! ComfyUI REST and WebSocket client library.
//!
//! Provides the HTTP API wrapper used by the completion monitor (prompt
//! submission, `/history`, `/queue`, cancellation), typed parsing of
//! history and queue payloads, and the WebSocket side used by the
//! progress relay: message parsing, connection handling, reconnection with
//! backoff and the per-frame processor.

pub mod api;
pub mod backend;
pub mod bridge;
pub mod client;
pub mod events;
pub mod history;
pub mod messages;
pub mod processor;
pub mod queue;
pub mod reconnect;

pub use api::{ComfyUIApi, ComfyUIApiError, SubmitResponse};
pub use backend::ComfyUIBackend;
pub use events::ProgressEvent;
pub use history::{HistoryEntry, HistoryOutcome};
pub use queue::{QueuePosition, QueueSnapshot};
