/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header carries an opcode outside `0..=4`.
    #[error("unknown opcode {0} in frame header")]
    UnknownOpcode(u32),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete payload is not valid UTF-8 JSON.
    #[error("malformed frame payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// The outgoing value could not be serialized to JSON.
    #[error("failed to encode payload: {0}")]
    Encoding(#[source] serde_json::Error),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was transferred.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Malformed-stream conditions: fatal to the connection they occur on.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownOpcode(_) | Self::PayloadTooLarge { .. } | Self::MalformedPayload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
