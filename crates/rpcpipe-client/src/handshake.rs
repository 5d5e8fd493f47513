use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Protocol version sent in the HANDSHAKE frame.
pub const PROTOCOL_VERSION: u32 = 1;

const MAX_CLIENT_ID_LEN: usize = 128;

/// HANDSHAKE frame payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version.
    pub v: u32,
    /// Application identifier registered with the peer.
    pub client_id: String,
}

impl HandshakeRequest {
    /// Peer-side check of an incoming hello.
    pub fn validate(&self, expected_version: u32) -> Result<()> {
        if self.v != expected_version {
            return Err(ClientError::HandshakeFailed(format!(
                "unsupported protocol version {} (expected {expected_version})",
                self.v
            )));
        }
        validate_client_id(&self.client_id)
    }
}

/// Configuration for the handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Protocol version to announce.
    pub version: u32,
    /// Application identifier. Must be set before connecting.
    pub client_id: String,
    /// Time allowed between sending HANDSHAKE and receiving READY.
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            client_id: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl HandshakeConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the HANDSHAKE payload, validating the configuration.
    pub fn request(&self) -> Result<HandshakeRequest> {
        validate_client_id(&self.client_id)?;
        Ok(HandshakeRequest {
            v: self.version,
            client_id: self.client_id.clone(),
        })
    }
}

/// Client ids are non-empty, at most 128 bytes, and free of control characters.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() {
        return Err(ClientError::HandshakeFailed(
            "client id must not be empty".to_string(),
        ));
    }
    if client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(ClientError::HandshakeFailed(format!(
            "client id too long: {} (max {MAX_CLIENT_ID_LEN})",
            client_id.len()
        )));
    }
    if client_id.chars().any(char::is_control) {
        return Err(ClientError::HandshakeFailed(
            "client id contains control characters".to_string(),
        ));
    }
    Ok(())
}
