//! Client core for a peer process reached over a local pipe.
//!
//! [`Client`] connects to the first reachable endpoint, performs the
//! handshake, keeps the connection alive, reconnects with backoff, and
//! correlates requests with responses. [`Pipeline`] layers bounded
//! concurrency, batching and a TTL cache on top.

pub mod client;
pub mod config;
pub mod control;
pub mod controls;
pub mod correlator;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod handshake;
pub mod message;
pub mod reconnect;
pub mod session;

pub use client::{Client, Subscription};
pub use config::{ClientConfig, ConfigFile};
pub use control::{keepalive_ping, ClosePayload, CLOSE_INVALID_CLIENT_ID, CLOSE_NORMAL};
pub use controls::{
    Admission, AdmissionQueue, BatchConfig, Batcher, Issue, Pipeline, PipelineConfig, RequestSpec,
    ResponseCache,
};
pub use correlator::{Correlator, Inbound, PendingRequest};
pub use dispatch::{DispatchTable, EventHandler, ListenerId};
pub use driver::{ClientEvent, ClientStats};
pub use error::{ClientError, Result};
pub use handshake::{validate_client_id, HandshakeConfig, HandshakeRequest, PROTOCOL_VERSION};
pub use message::{
    fingerprint, ErrorPayload, Message, CMD_DISPATCH, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE, EVT_ERROR,
    EVT_READY,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState, Supervisor};
pub use session::{Session, SessionState};
