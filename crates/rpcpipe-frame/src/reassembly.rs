//! Stream reassembly.
//!
//! A pipe read returns however many bytes happen to be available: part of a
//! header, several frames at once, or a payload cut at an arbitrary point.
//! [`Reassembler`] buffers chunks and yields frames strictly by the declared
//! length, so a payload is never parsed before all of it has arrived.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use crate::codec::{parse_header, validate_json, Frame, FrameHeader, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

/// Per-connection reassembly state.
#[derive(Debug)]
pub struct Reassembler {
    buf: BytesMut,
    /// Header of the frame whose payload is still incomplete.
    pending: Option<FrameHeader>,
    /// Violation found after earlier frames in the same chunk completed.
    failed: Option<FrameError>,
    max_payload: usize,
}

impl Reassembler {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            pending: None,
            failed: None,
            max_payload,
        }
    }

    /// Append a chunk and return every frame it completes, in stream order.
    ///
    /// Bytes past the last complete frame are retained for the next call.
    /// On error the state is cleared; the stream is no longer usable. When
    /// frames completed ahead of the bad bytes they are returned first and
    /// the error is held for [`take_failure`](Self::take_failure) or the
    /// next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Frame>> {
        if let Some(err) = self.failed.take() {
            return Err(err);
        }
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            let header = match self.pending {
                Some(header) => header,
                None => {
                    if self.buf.len() < HEADER_SIZE {
                        break;
                    }
                    let mut raw = [0u8; HEADER_SIZE];
                    raw.copy_from_slice(&self.buf[..HEADER_SIZE]);
                    let header = match parse_header(&raw, self.max_payload) {
                        Ok(header) => header,
                        Err(err) => {
                            warn!(%err, "invalid frame header");
                            return self.fail(frames, err);
                        }
                    };
                    self.buf.advance(HEADER_SIZE);
                    self.pending = Some(header);
                    header
                }
            };

            if self.buf.len() < header.len {
                trace!(
                    opcode = %header.opcode,
                    have = self.buf.len(),
                    need = header.len,
                    "awaiting rest of payload"
                );
                break;
            }

            let payload = self.buf.split_to(header.len).freeze();
            self.pending = None;
            if let Err(err) = validate_json(&payload) {
                warn!(opcode = %header.opcode, %err, "frame payload is not JSON");
                return self.fail(frames, err);
            }
            frames.push(Frame {
                opcode: header.opcode,
                payload,
            });
        }

        Ok(frames)
    }

    fn fail(&mut self, frames: Vec<Frame>, err: FrameError) -> Result<Vec<Frame>> {
        self.reset();
        if frames.is_empty() {
            return Err(err);
        }
        self.failed = Some(err);
        Ok(frames)
    }

    /// The violation held back by the last [`feed`](Self::feed), if any.
    pub fn take_failure(&mut self) -> Option<FrameError> {
        self.failed.take()
    }

    /// Opcode of a frame whose header arrived but whose payload has not.
    pub fn pending_opcode(&self) -> Option<Opcode> {
        self.pending.map(|h| h.opcode)
    }

    /// Bytes buffered but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True when no partial frame is held.
    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.buf.is_empty()
    }

    /// Drop all partial state. Called when a connection ends.
    ///
    /// A held-back failure survives; [`clear`](Self::clear) drops it too.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pending = None;
    }

    /// Drop partial state and any held-back failure.
    pub fn clear(&mut self) {
        self.reset();
        self.failed = None;
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}
