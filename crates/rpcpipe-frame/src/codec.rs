use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

/// Frame header: opcode (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// A complete frame: opcode plus raw JSON payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame operation code.
    pub opcode: Opcode,
    /// The UTF-8 JSON payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from already-encoded payload bytes.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a frame by serializing `value` as the payload.
    pub fn json<T: Serialize + ?Sized>(opcode: Opcode, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value).map_err(FrameError::Encoding)?;
        Ok(Self::new(opcode, payload))
    }

    /// Deserialize the payload.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(FrameError::MalformedPayload)
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// A parsed and validated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: Opcode,
    pub len: usize,
}

/// Parse the 8 header bytes.
///
/// Fails on an unknown opcode or a declared length above `max_payload`;
/// either means the stream can no longer be trusted.
pub fn parse_header(bytes: &[u8; HEADER_SIZE], max_payload: usize) -> Result<FrameHeader> {
    let raw_opcode = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;

    let opcode = Opcode::try_from(raw_opcode)?;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }

    Ok(FrameHeader { opcode, len })
}

/// Check that a complete payload is valid JSON.
pub fn validate_json(payload: &[u8]) -> Result<()> {
    serde_json::from_slice::<serde::de::IgnoredAny>(payload)
        .map(|_| ())
        .map_err(FrameError::MalformedPayload)
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────────┐
/// │ Opcode       │ Length       │ Payload              │
/// │ (4B LE u32)  │ (4B LE u32)  │ (Length bytes, JSON) │
/// └──────────────┴──────────────┴──────────────────────┘
/// ```
pub fn encode_frame(opcode: Opcode, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(opcode.as_u32());
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Serialize `value` and encode it as a frame.
///
/// Nothing is written to `dst` when serialization fails.
pub fn encode_json<T: Serialize + ?Sized>(
    opcode: Opcode,
    value: &T,
    dst: &mut BytesMut,
) -> Result<()> {
    let payload = serde_json::to_vec(value).map_err(FrameError::Encoding)?;
    encode_frame(opcode, &payload, dst)
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. The payload is
/// returned as-is; see [`validate_json`].
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&src[..HEADER_SIZE]);
    let header = parse_header(&raw, max_payload)?;

    let total = HEADER_SIZE + header.len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.len).freeze();

    Ok(Some(Frame {
        opcode: header.opcode,
        payload,
    }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// `tokio_util` codec for framed pipe I/O (`Framed<IpcStream, RpcCodec>`).
///
/// Decoded payloads are checked to be JSON.
#[derive(Debug, Clone)]
pub struct RpcCodec {
    max_payload: usize,
}

impl RpcCodec {
    pub fn new(config: &FrameConfig) -> Self {
        Self {
            max_payload: config.max_payload_size,
        }
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new(&FrameConfig::default())
    }
}

impl Decoder for RpcCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let Some(frame) = decode_frame(src, self.max_payload)? else {
            return Ok(None);
        };
        validate_json(&frame.payload)?;
        Ok(Some(frame))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Frame> for RpcCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.max_payload,
            });
        }
        encode_frame(frame.opcode, &frame.payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[test]
    fn encode_layout_is_opcode_then_length_le() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Ping, b"{}", &mut buf).unwrap();

        assert_eq!(&buf[..], &[3, 0, 0, 0, 2, 0, 0, 0, b'{', b'}']);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let mut buf = BytesMut::new();
        let payload = br#"{"cmd":"PING_CMD","nonce":"n-1"}"#;

        encode_frame(Opcode::Data, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.opcode, Opcode::Data);
        assert_eq!(frame.payload.as_ref(), payload);
        assert_eq!(frame.wire_size(), HEADER_SIZE + payload.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_incomplete_header() {
        let mut buf = BytesMut::from(&[1u8, 0, 0][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 3, "partial header must stay buffered");
    }

    #[test]
    fn decode_incomplete_payload() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Data, b"{\"a\":1}", &mut buf).unwrap();
        buf.truncate(HEADER_SIZE + 3);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE + 3);
    }

    #[test]
    fn decode_unknown_opcode() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(9);
        buf.put_u32_le(2);
        buf.put_slice(b"{}");

        let err = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::UnknownOpcode(9)));
        assert!(err.is_protocol_violation());
    }

    #[test]
    fn decode_declared_length_over_max() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(1024);

        let err = decode_frame(&mut buf, 512).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge {
                size: 1024,
                max: 512
            }
        ));
    }

    #[test]
    fn decode_multiple_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Handshake, b"{\"v\":1}", &mut buf).unwrap();
        encode_frame(Opcode::Pong, b"{}", &mut buf).unwrap();

        let first = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let second = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(first.opcode, Opcode::Handshake);
        assert_eq!(second.opcode, Opcode::Pong);
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload_frame() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Close, b"", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.opcode, Opcode::Close);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn encode_json_serializes_value() {
        let mut buf = BytesMut::new();
        encode_json(Opcode::Data, &json!({"cmd": "PING_CMD"}), &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let value: Value = frame.decode_json().unwrap();
        assert_eq!(value["cmd"], "PING_CMD");
    }

    #[test]
    fn encode_json_rejects_unserializable_value() {
        // JSON object keys must be strings.
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), "x");

        let mut buf = BytesMut::new();
        let err = encode_json(Opcode::Data, &map, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::Encoding(_)));
        assert!(!err.is_protocol_violation());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_json_reports_malformed_payload() {
        let frame = Frame::new(Opcode::Data, &b"not json"[..]);
        let err = frame.decode_json::<Value>().unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(_)));
    }

    #[test]
    fn parse_header_accepts_exact_max() {
        let mut raw = [0u8; HEADER_SIZE];
        raw[..4].copy_from_slice(&4u32.to_le_bytes());
        raw[4..].copy_from_slice(&64u32.to_le_bytes());

        let header = parse_header(&raw, 64).unwrap();
        assert_eq!(header.opcode, Opcode::Pong);
        assert_eq!(header.len, 64);
    }

    #[tokio::test]
    async fn codec_over_duplex_stream() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, RpcCodec::default());
        let mut reader = FramedRead::new(server, RpcCodec::default());

        let frame = Frame::json(Opcode::Data, &json!({"evt": "READY"})).unwrap();
        writer.send(frame.clone()).await.unwrap();
        drop(writer);

        let got = reader.next().await.unwrap().unwrap();
        assert_eq!(got, frame);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn codec_rejects_non_json_payload() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Data, b"{oops", &mut buf).unwrap();

        let mut codec = RpcCodec::default();
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::MalformedPayload(_)));
    }

    #[test]
    fn codec_eof_mid_frame_is_connection_closed() {
        let mut buf = BytesMut::new();
        encode_frame(Opcode::Data, b"{}", &mut buf).unwrap();
        buf.truncate(5);

        let mut codec = RpcCodec::default();
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn codec_refuses_to_encode_oversize_frame() {
        let mut codec = RpcCodec::new(&FrameConfig {
            max_payload_size: 4,
        });
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Frame::new(Opcode::Data, &b"{\"a\":1}"[..]), &mut buf)
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 7, max: 4 }));
    }
}
