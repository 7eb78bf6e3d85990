//! WebSocket client for a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection target; [`ComfyUIClient::connect`]
//! opens a live [`ComfyUIConnection`].
//!
//! ComfyUI only sends execution and progress frames to the socket whose
//! `clientId` matches the `client_id` a prompt was submitted with, so the
//! same id must be used for `POST /prompt` and for this connection.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used by the processor.
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection target for one ComfyUI server.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to ComfyUI.
pub struct ComfyUIConnection {
    /// Unique client ID sent during the handshake.
    pub client_id: String,
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// * `ws_url`    - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `client_id` - id shared with prompt submission.
    pub fn new(ws_url: String, client_id: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            client_id,
        }
    }

    /// Generate a fresh client id (UUID v4).
    pub fn generate_client_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Derive the WebSocket URL from an HTTP base URL
    /// (`http://` → `ws://`, `https://` → `wss://`).
    pub fn from_api_url(api_url: &str, client_id: String) -> Self {
        let ws_url = if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            api_url.to_string()
        };
        Self::new(ws_url, client_id)
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connect to `/ws?clientId=<client_id>`.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = self.client_id.clone();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
