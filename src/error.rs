//! Client error types.

use thiserror::Error;

/// WebSocket client errors.
#[derive(Error, Debug)]
pub enum WsError {
    /// The client is neither connected nor reconnecting.
    #[error("not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
