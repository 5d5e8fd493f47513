//! Opcode + length-prefixed JSON framing.
//!
//! Every message on the pipe is framed with:
//! - A 4-byte little-endian opcode (HANDSHAKE, DATA, CLOSE, PING, PONG)
//! - A 4-byte little-endian payload length
//! - Exactly that many bytes of UTF-8 JSON
//!
//! [`Reassembler`] turns arbitrary stream chunks back into whole frames;
//! [`FrameWriter`] and [`RpcCodec`] cover the write side and `tokio_util` users.

pub mod codec;
pub mod error;
pub mod opcode;
pub mod reassembly;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_json, parse_header, validate_json, Frame, FrameConfig,
    FrameHeader, RpcCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use opcode::Opcode;
pub use reassembly::Reassembler;
pub use writer::FrameWriter;
