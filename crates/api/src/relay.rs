//! Fan-out of live job updates to browser WebSocket clients.
//!
//! [`ProgressRelay`] consumes ComfyUI progress from the bridge, maps each
//! prompt to its production job, stores the percentage and broadcasts a
//! `job_progress` message. [`JobEventRelay`] forwards lifecycle events from
//! the event bus (`job.completed`, `job.failed`, ...) as typed messages.

use std::collections::HashMap;
use std::sync::Arc;

use renderwatch_comfyui::ProgressEvent;
use renderwatch_core::job_events::{ws_type_for_event, MSG_TYPE_JOB_PROGRESS};
use renderwatch_db::repositories::ProductionJobRepo;
use renderwatch_db::DbPool;
use renderwatch_events::MonitorEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::ws::ProgressHub;

// ---------------------------------------------------------------------------
// ComfyUI progress
// ---------------------------------------------------------------------------

/// Prompts tracked for de-duplication before the cache starts over.
const MAX_TRACKED_PROMPTS: usize = 1024;

/// Last percentage written per prompt.
///
/// Entries go away when a prompt starts, finishes or fails. Prompts whose
/// end was never seen (missed during a reconnect) are dropped when the
/// cache fills up; the cost is one repeated write per live prompt.
#[derive(Debug, Default)]
struct PercentCache {
    last: HashMap<String, i16>,
}

impl PercentCache {
    fn is_repeat(&self, prompt_id: &str, percent: i16) -> bool {
        self.last.get(prompt_id) == Some(&percent)
    }

    fn record(&mut self, prompt_id: &str, percent: i16) {
        if !self.last.contains_key(prompt_id) && self.len() >= MAX_TRACKED_PROMPTS {
            tracing::debug!(tracked = self.len(), "Progress cache full, starting over");
            self.last.clear();
        }
        self.last.insert(prompt_id.to_string(), percent);
    }

    fn forget(&mut self, prompt_id: &str) {
        self.last.remove(prompt_id);
    }

    fn len(&self) -> usize {
        self.last.len()
    }
}

pub struct ProgressRelay {
    pool: DbPool,
    progress_hub: Arc<ProgressHub>,
    last_percent: PercentCache,
}

impl ProgressRelay {
    pub fn new(pool: DbPool, progress_hub: Arc<ProgressHub>) -> Self {
        Self {
            pool,
            progress_hub,
            last_percent: PercentCache::default(),
        }
    }

    /// Relay events until the channel closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut receiver: broadcast::Receiver<ProgressEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Progress relay started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match event {
                Ok(event) => self.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Progress relay lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("Progress relay stopped");
    }

    async fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::Progress {
                prompt_id,
                percent,
                node,
            } => {
                if self.last_percent.is_repeat(&prompt_id, percent) {
                    return;
                }
                let job_id =
                    match ProductionJobRepo::update_progress(&self.pool, &prompt_id, percent).await {
                        Ok(Some(job_id)) => job_id,
                        Ok(None) => {
                            // Prompt queued by another ComfyUI client, or the
                            // job already moved on.
                            tracing::trace!(prompt_id = %prompt_id, "No processing job for prompt");
                            self.last_percent.forget(&prompt_id);
                            return;
                        }
                        Err(e) => {
                            tracing::warn!(prompt_id = %prompt_id, error = %e, "Failed to store progress");
                            return;
                        }
                    };
                self.last_percent.record(&prompt_id, percent);
                self.progress_hub
                    .publish(&serde_json::json!({
                        "type": MSG_TYPE_JOB_PROGRESS,
                        "job_id": job_id,
                        "prompt_id": prompt_id,
                        "percent": percent,
                        "node": node,
                    }))
                    .await;
            }
            ProgressEvent::Started { prompt_id } => {
                tracing::debug!(prompt_id = %prompt_id, "Prompt started");
                self.last_percent.forget(&prompt_id);
            }
            ProgressEvent::Finished { prompt_id } => {
                // Outcome is decided by the completion monitor.
                tracing::debug!(prompt_id = %prompt_id, "Prompt finished");
                self.last_percent.forget(&prompt_id);
            }
            ProgressEvent::Failed { prompt_id, error } => {
                tracing::debug!(prompt_id = %prompt_id, error = %error, "Prompt failed");
                self.last_percent.forget(&prompt_id);
            }
            ProgressEvent::NodeExecuted { .. } | ProgressEvent::QueueDepth { .. } => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Bus lifecycle events
// ---------------------------------------------------------------------------

pub struct JobEventRelay {
    progress_hub: Arc<ProgressHub>,
}

impl JobEventRelay {
    pub fn new(progress_hub: Arc<ProgressHub>) -> Self {
        Self { progress_hub }
    }

    /// Build the WebSocket payload for a bus event, or `None` if browsers
    /// do not care about it.
    pub fn message_for(event: &MonitorEvent) -> Option<serde_json::Value> {
        let msg_type = ws_type_for_event(&event.event_type)?;
        let mut message = serde_json::json!({
            "type": msg_type,
            "job_id": event.job_id(),
            "timestamp": event.timestamp,
        });
        if let (Some(base), Some(payload)) = (message.as_object_mut(), event.payload.as_object()) {
            for (key, value) in payload {
                base.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        Some(message)
    }

    pub async fn run(self, mut receiver: broadcast::Receiver<MonitorEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match event {
                Ok(event) => {
                    if let Some(message) = Self::message_for(&event) {
                        let sent = self.progress_hub.publish(&message).await;
                        tracing::debug!(event_type = %event.event_type, sent, "Relayed job event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Job event relay lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::info!("Job event relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use renderwatch_core::job_events::{EVENT_JOB_COMPLETED, EVENT_JOB_SUBMITTED};

    use super::*;

    #[test]
    fn lifecycle_event_becomes_typed_message() {
        let event = MonitorEvent::for_job(EVENT_JOB_COMPLETED, 12)
            .with_payload(serde_json::json!({"output_paths": ["a.png"], "type": "ignored"}));

        let message = JobEventRelay::message_for(&event).unwrap();
        assert_eq!(message["type"], "job_completed");
        assert_eq!(message["job_id"], 12);
        assert_eq!(message["output_paths"][0], "a.png");
    }

    #[test]
    fn percent_cache_drops_repeats_only() {
        let mut cache = PercentCache::default();
        assert!(!cache.is_repeat("p-1", 10));
        cache.record("p-1", 10);
        assert!(cache.is_repeat("p-1", 10));
        assert!(!cache.is_repeat("p-1", 20));
        cache.forget("p-1");
        assert!(!cache.is_repeat("p-1", 10));
    }

    #[test]
    fn percent_cache_is_bounded() {
        let mut cache = PercentCache::default();
        for n in 0..MAX_TRACKED_PROMPTS {
            cache.record(&format!("p-{n}"), 50);
        }
        assert_eq!(cache.len(), MAX_TRACKED_PROMPTS);

        // Updating a tracked prompt keeps everything.
        cache.record("p-0", 60);
        assert_eq!(cache.len(), MAX_TRACKED_PROMPTS);

        cache.record("p-new", 5);
        assert_eq!(cache.len(), 1);
        assert!(cache.is_repeat("p-new", 5));
    }

    #[test]
    fn internal_events_are_not_relayed() {
        let event = MonitorEvent::for_job(EVENT_JOB_SUBMITTED, 12);
        assert!(JobEventRelay::message_for(&event).is_none());
    }
}
