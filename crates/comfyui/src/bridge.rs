//! Long-lived WebSocket bridge to ComfyUI.
//!
//! [`ProgressBridge`] keeps one socket open (reconnecting with backoff when
//! it drops) and republishes every [`ProgressEvent`] on a broadcast channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClient;
use crate::events::ProgressEvent;
use crate::processor::process_messages;
use crate::reconnect::{connect_with_backoff, BackoffPolicy, SessionBackoff};

/// Broadcast channel capacity for progress events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct ProgressBridge {
    event_tx: broadcast::Sender<ProgressEvent>,
    cancel: CancellationToken,
    task_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ProgressBridge {
    /// Spawn the connection task. `cancel` should be a child of the
    /// application's shutdown token.
    pub fn start(
        client: ComfyUIClient,
        backoff: BackoffPolicy,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_tx = event_tx.clone();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(ws_url = %client.ws_url(), "Starting ComfyUI progress bridge");
            run_connection_loop(&client, &backoff, &task_tx, &task_cancel).await;
            tracing::info!("ComfyUI progress bridge exited");
        });

        Arc::new(Self {
            event_tx,
            cancel,
            task_handle: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the connection task, waiting up to 5 seconds for it to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.lock().await.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}

async fn run_connection_loop(
    client: &ComfyUIClient,
    backoff: &BackoffPolicy,
    event_tx: &broadcast::Sender<ProgressEvent>,
    cancel: &CancellationToken,
) {
    let mut sessions = SessionBackoff::new(backoff);
    while let Some(conn) = connect_with_backoff(client, backoff, cancel).await {
        let opened = Instant::now();
        let mut ws_stream = conn.ws_stream;
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = process_messages(&mut ws_stream, event_tx) => {}
        }
        let uptime = opened.elapsed();
        let wait = sessions.after_session(uptime);
        tracing::info!(
            client_id = %conn.client_id,
            uptime_ms = uptime.as_millis() as u64,
            retry_in_ms = wait.as_millis() as u64,
            "ComfyUI connection lost, reconnecting",
        );
        if !wait.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
