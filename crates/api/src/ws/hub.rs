use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// How often idle sessions are pinged.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Process-local identifier of one `/ws` session.
pub type SessionId = u64;

type Outbox = mpsc::UnboundedSender<Message>;

/// Registry of open progress-stream sessions.
///
/// Each session owns an unbounded outbox drained by its socket writer, so a
/// slow browser never blocks the relays that publish here.
pub struct ProgressHub {
    sessions: RwLock<HashMap<SessionId, Outbox>>,
    next_id: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a session and return its id with the receiving end of its outbox.
    pub async fn register(&self) -> (SessionId, mpsc::UnboundedReceiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn unregister(&self, id: SessionId) {
        self.sessions.write().await.remove(&id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Queue `frame` for every session whose writer is still running.
    ///
    /// Returns how many sessions accepted it. Sessions with a dead writer
    /// stay registered until their reader notices and unregisters.
    pub async fn broadcast(&self, frame: Message) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|outbox| outbox.send(frame.clone()).is_ok())
            .count()
    }

    /// Broadcast `payload` as a JSON text frame.
    pub async fn publish(&self, payload: &serde_json::Value) -> usize {
        self.broadcast(Message::Text(payload.to_string().into())).await
    }

    /// Send Close to every session and forget them all.
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        for outbox in sessions.values() {
            let _ = outbox.send(Message::Close(None));
        }
        let closed = sessions.len();
        sessions.clear();
        closed
    }

    /// Ping every session each `period` until `cancel` fires.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pinged = hub.broadcast(Message::Ping(Bytes::new())).await;
                        tracing::trace!(pinged, "Progress stream keepalive");
                    }
                }
            }
        })
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}
