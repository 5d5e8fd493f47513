use std::path::{Path, PathBuf};
use std::time::Duration;

use rpcpipe_frame::FrameConfig;
use rpcpipe_transport::{EndpointConfig, ProbeConfig};
use serde::Deserialize;

use crate::controls::{BatchConfig, PipelineConfig};
use crate::error::{ClientError, Result};
use crate::handshake::HandshakeConfig;
use crate::reconnect::ReconnectPolicy;

/// Everything a [`crate::Client`] needs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub handshake: HandshakeConfig,
    pub frame: FrameConfig,
    pub reconnect: ReconnectPolicy,
    /// Deadline for each request, from admission to response.
    pub request_timeout: Duration,
    /// PING interval while ready.
    pub keepalive_interval: Duration,
    pub endpoint: EndpointConfig,
    pub probe: ProbeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            frame: FrameConfig::default(),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(15),
            endpoint: EndpointConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            handshake: HandshakeConfig::new(client_id),
            ..Self::default()
        }
    }

    pub fn with_endpoints(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.endpoint.explicit = paths.into_iter().collect();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake.timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Reject values the driver cannot work with.
    pub fn validate(&self) -> Result<()> {
        crate::handshake::validate_client_id(&self.handshake.client_id)?;
        if self.request_timeout.is_zero() {
            return Err(ClientError::Config("request timeout must be positive".into()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(ClientError::Config("keepalive interval must be positive".into()));
        }
        if self.frame.max_payload_size == 0 {
            return Err(ClientError::Config("max payload size must be positive".into()));
        }
        Ok(())
    }
}

/// On-disk configuration, JSON. Durations are milliseconds.
///
/// ```json
/// {
///   "client_id": "123456",
///   "endpoints": ["/run/user/1000/app-ipc-0"],
///   "request_timeout_ms": 5000,
///   "reconnect": { "max_attempts": 3 },
///   "pipeline": { "max_concurrent": 4, "batch_delay_ms": 20 }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub client_id: Option<String>,
    pub endpoints: Vec<PathBuf>,
    pub base_name: Option<String>,
    pub instances: Option<u8>,
    pub request_timeout_ms: Option<u64>,
    pub keepalive_interval_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub max_payload_size: Option<usize>,
    pub reconnect: Option<ReconnectFile>,
    pub pipeline: Option<PipelineFile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectFile {
    pub enabled: Option<bool>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineFile {
    pub max_concurrent: Option<usize>,
    /// Absent or zero disables batching.
    pub batch_delay_ms: Option<u64>,
    pub cache_ttl_ms: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))?;
        Self::parse(&text).map_err(|e| ClientError::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Overlay the file's values on `config`.
    pub fn apply(&self, config: &mut ClientConfig) {
        if let Some(id) = &self.client_id {
            config.handshake.client_id = id.clone();
        }
        if !self.endpoints.is_empty() {
            config.endpoint.explicit = self.endpoints.clone();
        }
        if let Some(base) = &self.base_name {
            config.endpoint.base_name = base.clone();
        }
        if let Some(n) = self.instances {
            config.endpoint.instances = n;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.keepalive_interval_ms {
            config.keepalive_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.handshake_timeout_ms {
            config.handshake.timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_payload_size {
            config.frame.max_payload_size = max;
        }
        if let Some(r) = &self.reconnect {
            let policy = &mut config.reconnect;
            policy.enabled = r.enabled.unwrap_or(policy.enabled);
            policy.max_attempts = r.max_attempts.unwrap_or(policy.max_attempts);
            if let Some(ms) = r.base_delay_ms {
                policy.base_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = r.max_delay_ms {
                policy.max_delay = Duration::from_millis(ms);
            }
        }
    }

    /// Client configuration: defaults overlaid with the file.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        self.apply(&mut config);
        config
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        let Some(p) = &self.pipeline else {
            return config;
        };
        if let Some(n) = p.max_concurrent {
            config.max_concurrent = n;
        }
        config.batch = match p.batch_delay_ms {
            Some(ms) if ms > 0 => Some(BatchConfig {
                delay: Duration::from_millis(ms),
            }),
            _ => None,
        };
        if let Some(ms) = p.cache_ttl_ms {
            config.cache_ttl = Duration::from_millis(ms);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.handshake.timeout, Duration::from_secs(10));
        assert_eq!(config.frame.max_payload_size, 64 * 1024);
        assert!(config.validate().is_err(), "client id is required");
        assert!(ClientConfig::new("1").validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = ClientConfig::new("1").with_request_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn file_overlays_defaults() {
        let file = ConfigFile::parse(
            r#"{
                "client_id": "abc",
                "endpoints": ["/tmp/x.sock"],
                "request_timeout_ms": 250,
                "reconnect": {"enabled": false, "base_delay_ms": 10},
                "pipeline": {"max_concurrent": 2, "batch_delay_ms": 5, "cache_ttl_ms": 1000}
            }"#,
        )
        .unwrap();

        let config = file.client_config();
        assert_eq!(config.handshake.client_id, "abc");
        assert_eq!(config.endpoint.explicit, vec![PathBuf::from("/tmp/x.sock")]);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.base_delay, Duration::from_millis(10));
        assert_eq!(config.reconnect.max_attempts, 5);

        let pipeline = file.pipeline_config();
        assert_eq!(pipeline.max_concurrent, 2);
        assert_eq!(pipeline.batch.unwrap().delay, Duration::from_millis(5));
        assert_eq!(pipeline.cache_ttl, Duration::from_secs(1));
    }

    #[test]
    fn zero_batch_delay_disables_batching() {
        let file = ConfigFile::parse(r#"{"pipeline": {"batch_delay_ms": 0}}"#).unwrap();
        assert!(file.pipeline_config().batch.is_none());
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(ConfigFile::parse(r#"{"client-id": "x"}"#).is_err());
    }

    #[test]
    fn load_reports_path_on_error() {
        let path = std::env::temp_dir().join(format!("rpcpipe-config-{}.json", std::process::id()));
        std::fs::write(&path, "{not json").unwrap();
        let err = ConfigFile::load(&path).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
        let _ = std::fs::remove_file(&path);
    }
}
