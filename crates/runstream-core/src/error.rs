//! Error types for the run engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("WebSocket not available")]
    SocketUnavailable,

    #[error("WebSocket is not open")]
    SocketNotOpen,

    #[error("WebSocket closed before opening")]
    SocketClosedBeforeOpen,

    #[error("Timed out waiting for WebSocket to open")]
    OpenTimeout,

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error")]
    ChannelSend,
}
