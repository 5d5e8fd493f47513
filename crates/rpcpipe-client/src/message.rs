//! DATA frame payloads.
//!
//! One shape serves both directions; the peer's field names are kept as-is
//! (`cmd`, `args`, `evt`, `nonce`, `data`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CMD_DISPATCH: &str = "DISPATCH";
pub const CMD_SUBSCRIBE: &str = "SUBSCRIBE";
pub const CMD_UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const EVT_READY: &str = "READY";
pub const EVT_ERROR: &str = "ERROR";

/// A DATA frame payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `data` of an `ERROR` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl Message {
    /// Outgoing command.
    pub fn request(command: &str, args: Value, evt: Option<&str>, nonce: &str) -> Self {
        Self {
            cmd: Some(command.to_string()),
            args: Some(args),
            evt: evt.map(str::to_string),
            nonce: Some(nonce.to_string()),
            data: None,
        }
    }

    /// The READY dispatch a peer sends once the handshake is accepted.
    pub fn ready(data: Value) -> Self {
        Self {
            cmd: Some(CMD_DISPATCH.to_string()),
            evt: Some(EVT_READY.to_string()),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Successful response to the request carrying `nonce`.
    pub fn response(command: Option<&str>, nonce: &str, data: Value) -> Self {
        Self {
            cmd: command.map(str::to_string),
            nonce: Some(nonce.to_string()),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Error response to the request carrying `nonce`.
    pub fn error_response(command: Option<&str>, nonce: &str, code: i64, message: &str) -> Self {
        Self {
            cmd: command.map(str::to_string),
            evt: Some(EVT_ERROR.to_string()),
            nonce: Some(nonce.to_string()),
            data: Some(serde_json::json!({ "code": code, "message": message })),
            ..Self::default()
        }
    }

    /// Broadcast event without a correlation token.
    pub fn event(evt: &str, data: Value) -> Self {
        Self {
            cmd: Some(CMD_DISPATCH.to_string()),
            evt: Some(evt.to_string()),
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn is_ready(&self) -> bool {
        self.cmd.as_deref() == Some(CMD_DISPATCH) && self.evt.as_deref() == Some(EVT_READY)
    }

    /// The error carried by an `ERROR` response, if this is one.
    pub fn error(&self) -> Option<ErrorPayload> {
        if self.evt.as_deref() != Some(EVT_ERROR) {
            return None;
        }
        let data = self.data.clone().unwrap_or(Value::Null);
        Some(serde_json::from_value(data).unwrap_or_else(|_| ErrorPayload {
            code: 0,
            message: "malformed error payload".to_string(),
        }))
    }

    /// Body of the message, JSON `null` when absent.
    pub fn into_data(self) -> Value {
        self.data.unwrap_or(Value::Null)
    }
}

/// Deterministic key for a name plus arguments.
///
/// `serde_json::Map` keeps keys sorted, so equal arguments always serialize
/// identically regardless of construction order.
pub fn fingerprint(name: &str, args: &Value) -> String {
    format!("{name}:{args}")
}
