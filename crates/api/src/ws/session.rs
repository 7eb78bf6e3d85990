use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::hub::{ProgressHub, SessionId};

/// GET /ws -- subscribe to job progress.
///
/// Push-only: clients receive `job_progress` and job lifecycle messages.
/// Inbound frames other than Close are dropped.
pub async fn progress_stream(
    upgrade: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let hub = state.progress_hub;
    upgrade.on_upgrade(move |socket| run_session(socket, hub))
}

async fn run_session(socket: WebSocket, hub: Arc<ProgressHub>) {
    let (session, outbound) = hub.register().await;
    let subscribers = hub.len().await;
    tracing::info!(%session, subscribers, "Progress subscriber joined");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(pump_outbound(session, outbound, sink));

    tokio::select! {
        _ = drain_inbound(session, stream) => writer.abort(),
        _ = &mut writer => {}
    }

    hub.unregister(session).await;
    tracing::info!(%session, "Progress subscriber left");
}

/// Copy hub messages onto the socket until the hub closes the session or
/// the peer goes away.
async fn pump_outbound(
    session: SessionId,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = outbound.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            tracing::debug!(%session, error = %e, "Progress socket write failed");
            return;
        }
        if is_close {
            return;
        }
    }
}

/// Read until the client closes or the socket errors.
async fn drain_inbound(session: SessionId, mut stream: SplitStream<WebSocket>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Close(reason)) => {
                tracing::debug!(%session, ?reason, "Client closed progress stream");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(%session, error = %e, "Progress socket read failed");
                return;
            }
        }
    }
}
