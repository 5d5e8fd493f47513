//! RPC client for a long-lived peer process reached over a local pipe.
//!
//! # Crate Structure
//!
//! - [`transport`]: endpoint discovery, async byte streams, HTTP side-channel probe
//! - [`frame`]: the 8-byte-header JSON framing, reassembly and codec
//! - [`client`]: session, reconnection, request correlation and concurrency
//!   controls (behind the default `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use rpcpipe_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rpcpipe_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use rpcpipe_client::*;
}

#[cfg(feature = "client")]
pub use rpcpipe_client::{Client, ClientConfig, ClientError, ClientEvent, Pipeline, PipelineConfig};
