//! Local endpoint discovery and async byte streams.
//!
//! The lowest layer of rpcpipe:
//! - [`EndpointResolver`] produces the ordered candidate addresses of the peer
//!   (`<runtime-dir>/<base>-N` on Unix, `\\?\pipe\<base>-N` on Windows)
//! - [`IpcStream`] is the connected byte stream, async over Unix domain sockets
//!   or Windows named pipes
//! - [`probe`] finds the peer's HTTP side-channel when the pipe protocol asks for it
//!
//! Everything else builds on the [`IpcStream`] type provided here.

pub mod endpoint;
pub mod error;
pub mod probe;
pub mod stream;

#[cfg(unix)]
pub mod uds;

pub use endpoint::{EndpointConfig, EndpointResolver, DEFAULT_BASE_NAME, DEFAULT_INSTANCES};
pub use error::{Result, TransportError};
pub use probe::{
    probe_for_alternate_endpoint, HttpProbe, HyperProbe, ProbeConfig, DEFAULT_BASE_PORT,
    DEFAULT_PORT_SPAN,
};
pub use stream::IpcStream;

#[cfg(unix)]
pub use uds::IpcListener;
