use std::path::PathBuf;

use tracing::trace;

/// Default endpoint base name; instance `N` listens on `<base>-N`.
pub const DEFAULT_BASE_NAME: &str = "discord-ipc";

/// Number of numbered instances (`0..N`) tried in order.
pub const DEFAULT_INSTANCES: u8 = 10;

/// Where to look for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint base name.
    pub base_name: String,
    /// Number of numbered instances to try.
    pub instances: u8,
    /// Explicit addresses. When non-empty these replace the computed candidates.
    pub explicit: Vec<PathBuf>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_name: DEFAULT_BASE_NAME.to_string(),
            instances: DEFAULT_INSTANCES,
            explicit: Vec::new(),
        }
    }
}

/// Produces the ordered list of candidate local addresses of the peer.
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    config: EndpointConfig,
}

impl EndpointResolver {
    /// Create a resolver from explicit configuration.
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }

    /// Resolver that only ever yields the given addresses.
    pub fn fixed(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self::new(EndpointConfig {
            explicit: paths.into_iter().collect(),
            ..EndpointConfig::default()
        })
    }

    /// Candidate addresses, in the order they should be attempted.
    pub fn candidate_paths(&self) -> Vec<PathBuf> {
        if !self.config.explicit.is_empty() {
            return self.config.explicit.clone();
        }

        let paths: Vec<PathBuf> = (0..self.config.instances)
            .map(|instance| platform_path(&self.config.base_name, instance))
            .collect();
        trace!(count = paths.len(), "computed endpoint candidates");
        paths
    }

    /// Resolver configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }
}

#[cfg(unix)]
fn platform_path(base_name: &str, instance: u8) -> PathBuf {
    runtime_dir().join(format!("{base_name}-{instance}"))
}

#[cfg(windows)]
fn platform_path(base_name: &str, instance: u8) -> PathBuf {
    PathBuf::from(format!(r"\\?\pipe\{base_name}-{instance}"))
}

/// First non-empty of `XDG_RUNTIME_DIR`, `TMPDIR`, `TMP`, `TEMP`, else `/tmp`.
#[cfg(unix)]
fn runtime_dir() -> PathBuf {
    ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .filter_map(std::env::var_os)
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}
