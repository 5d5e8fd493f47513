//! Frame opcodes.

use std::fmt;

use crate::error::FrameError;

/// Frame operation code, the first header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    /// Client hello carrying protocol version and client id.
    Handshake = 0,
    /// Commands, responses and dispatched events.
    Data = 1,
    /// Graceful close, in either direction.
    Close = 2,
    /// Keep-alive probe; answered with `Pong` echoing the payload.
    Ping = 3,
    /// Keep-alive answer.
    Pong = 4,
}

impl Opcode {
    /// Wire value of this opcode.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Human-readable opcode name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::Data => "DATA",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        }
    }
}

impl TryFrom<u32> for Opcode {
    type Error = FrameError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handshake),
            1 => Ok(Self::Data),
            2 => Ok(Self::Close),
            3 => Ok(Self::Ping),
            4 => Ok(Self::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
