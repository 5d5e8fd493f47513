use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// CLOSE code: normal closure.
pub const CLOSE_NORMAL: i64 = 1000;
/// CLOSE code sent by peers that reject the client id.
pub const CLOSE_INVALID_CLIENT_ID: i64 = 4000;

/// CLOSE frame payload, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosePayload {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl ClosePayload {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Normal closure initiated by this side.
    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "client closing")
    }

    /// Lenient parse of a received CLOSE payload.
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_else(|_| Self::new(0, value.to_string()))
    }
}

/// Keep-alive PING payload.
pub fn keepalive_ping(seq: u64) -> Value {
    json!({ "nonce": seq })
}
