use std::time::Duration;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] rpcpipe_transport::TransportError),

    /// Frame-level error, including malformed streams.
    #[error("frame error: {0}")]
    Frame(#[from] rpcpipe_frame::FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or unreadable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The peer refused or never completed the handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// No candidate endpoint accepted a connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The operation needs an open session.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped while the request was in flight.
    #[error("connection lost")]
    ConnectionLost,

    /// No response arrived before the request deadline.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The peer answered with an error payload.
    #[error("request failed ({code}): {message}")]
    RequestFailed { code: i64, message: String },

    /// Automatic reconnection gave up.
    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// The client has shut down.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// True for malformed-stream errors, which are fatal to the connection.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Frame(err) if err.is_protocol_violation())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
