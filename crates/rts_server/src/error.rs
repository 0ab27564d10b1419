//! Server-level error types.

use thiserror::Error;

/// Errors that end a listener or a connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or framing failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Message encoding failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
