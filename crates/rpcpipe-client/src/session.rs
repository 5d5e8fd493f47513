//! One connection to the peer.
//!
//! A [`Session`] owns the byte stream, its [`Reassembler`] and the frame
//! writer. It knows nothing about requests; the driver feeds it outgoing
//! frames and receives decoded ones.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rpcpipe_frame::{Frame, FrameConfig, FrameError, FrameWriter, Opcode, Reassembler};
use rpcpipe_transport::{EndpointResolver, IpcStream};
use serde::Serialize;
use tokio::io::{AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::control::ClosePayload;
use crate::error::{ClientError, Result};
use crate::handshake::HandshakeConfig;

const READ_CHUNK: usize = 8 * 1024;
/// How long `close` waits for the peer to end its side of the stream.
const CLOSE_DRAIN: Duration = Duration::from_millis(250);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Resolving,
    Connecting,
    HandshakeSent,
    Ready,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Resolving => "resolving",
            Self::Connecting => "connecting",
            Self::HandshakeSent => "handshake_sent",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// States in which frames may be sent.
    pub fn can_send(self) -> bool {
        matches!(self, Self::HandshakeSent | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Connection {
    reader: ReadHalf<IpcStream>,
    writer: FrameWriter<WriteHalf<IpcStream>>,
    path: PathBuf,
}

/// Exclusive owner of the connection and its reassembly state.
pub struct Session {
    state: SessionState,
    conn: Option<Connection>,
    reassembler: Reassembler,
    read_buf: Box<[u8]>,
    resolver: EndpointResolver,
    handshake: HandshakeConfig,
    frame: FrameConfig,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(
        resolver: EndpointResolver,
        handshake: HandshakeConfig,
        frame: FrameConfig,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        state_tx.send_replace(SessionState::Disconnected);
        Self {
            state: SessionState::Disconnected,
            conn: None,
            reassembler: Reassembler::new(frame.max_payload_size),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            resolver,
            handshake,
            frame,
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while a byte stream is held.
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Address of the current connection.
    pub fn path(&self) -> Option<&Path> {
        self.conn.as_ref().map(|c| c.path.as_path())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    /// Walk the candidate addresses, connect to the first that answers and
    /// send HANDSHAKE on it.
    ///
    /// On success the session is `HandshakeSent`; READY arrives later through
    /// [`Session::recv`].
    pub async fn connect(&mut self) -> Result<PathBuf> {
        if self.conn.is_some() {
            self.disconnect();
        }

        self.set_state(SessionState::Resolving);
        let hello = match self.handshake.request() {
            Ok(hello) => hello,
            Err(err) => {
                self.set_state(SessionState::Disconnected);
                return Err(err);
            }
        };
        let candidates = self.resolver.candidate_paths();
        if candidates.is_empty() {
            self.set_state(SessionState::Disconnected);
            return Err(ClientError::ConnectionFailed(
                "no endpoint candidates".to_string(),
            ));
        }

        self.set_state(SessionState::Connecting);
        let tried = candidates.len();
        let mut last_err = None;
        for path in candidates {
            let stream = match IpcStream::connect(&path).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(?path, %err, "endpoint unavailable");
                    last_err = Some(err);
                    continue;
                }
            };

            let (reader, writer) = tokio::io::split(stream);
            self.reassembler.clear();
            self.conn = Some(Connection {
                reader,
                writer: FrameWriter::with_config(writer, self.frame.clone()),
                path: path.clone(),
            });

            if let Err(err) = self.write(Opcode::Handshake, &hello).await {
                warn!(?path, %err, "failed to send handshake");
                self.disconnect();
                return Err(err);
            }
            self.set_state(SessionState::HandshakeSent);
            info!(?path, client_id = %hello.client_id, "handshake sent");
            return Ok(path);
        }

        self.set_state(SessionState::Disconnected);
        let detail = last_err.map(|e| e.to_string()).unwrap_or_default();
        Err(ClientError::ConnectionFailed(format!(
            "{tried} candidate endpoint(s) unavailable; last error: {detail}"
        )))
    }

    /// READY received.
    pub fn mark_ready(&mut self) {
        if self.state == SessionState::HandshakeSent {
            self.set_state(SessionState::Ready);
        }
    }

    /// Send a JSON payload. Only valid in `HandshakeSent` or `Ready`.
    pub async fn send_json<T: Serialize + ?Sized>(&mut self, opcode: Opcode, value: &T) -> Result<()> {
        if !self.state.can_send() {
            return Err(ClientError::NotConnected);
        }
        self.write(opcode, value).await
    }

    /// Send already-encoded payload bytes. Only valid in `HandshakeSent` or `Ready`.
    pub async fn send_raw(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if !self.state.can_send() {
            return Err(ClientError::NotConnected);
        }
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        conn.writer.send(opcode, payload).await?;
        Ok(())
    }

    async fn write<T: Serialize + ?Sized>(&mut self, opcode: Opcode, value: &T) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(ClientError::NotConnected)?;
        conn.writer.send_json(opcode, value).await?;
        Ok(())
    }

    /// Read once from the stream and return the frames that completed.
    ///
    /// Cancel-safe: no bytes are consumed unless the future completes. Pends
    /// forever when there is no connection. End of stream is reported as
    /// [`FrameError::ConnectionClosed`]. A violation that followed frames
    /// already returned is reported here without reading again.
    pub async fn recv(&mut self) -> Result<Vec<Frame>> {
        if let Some(err) = self.reassembler.take_failure() {
            return Err(err.into());
        }
        let Some(conn) = self.conn.as_mut() else {
            return std::future::pending().await;
        };
        let n = conn.reader.read(&mut self.read_buf).await.map_err(FrameError::Io)?;
        if n == 0 {
            return Err(FrameError::ConnectionClosed.into());
        }
        Ok(self.reassembler.feed(&self.read_buf[..n])?)
    }

    /// Graceful close: send CLOSE, shut the stream down, end in `Closed`.
    ///
    /// Waits up to a short bound for the peer's end of stream before the
    /// connection is dropped; anything it sends meanwhile is discarded.
    pub async fn close(&mut self, payload: &ClosePayload) {
        if let Some(mut conn) = self.conn.take() {
            self.set_state(SessionState::Closing);
            if let Err(err) = conn.writer.send_json(Opcode::Close, payload).await {
                debug!(%err, "CLOSE not delivered");
            }
            if let Err(err) = conn.writer.shutdown().await {
                debug!(%err, "shutdown after CLOSE failed");
            }
            if tokio::time::timeout(CLOSE_DRAIN, drain_to_eof(&mut conn.reader))
                .await
                .is_err()
            {
                debug!(path = ?conn.path, "peer kept its side open after CLOSE");
            }
            info!(path = ?conn.path, code = payload.code, "session closed");
        }
        self.reassembler.clear();
        self.set_state(SessionState::Closed);
    }

    /// Abrupt teardown after a failure; ends in `Disconnected`.
    pub fn disconnect(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(path = ?conn.path, "dropping connection");
        }
        self.reassembler.clear();
        self.set_state(SessionState::Disconnected);
    }
}

async fn drain_to_eof(reader: &mut ReadHalf<IpcStream>) {
    let mut sink = [0u8; 512];
    while let Ok(n) = reader.read(&mut sink).await {
        if n == 0 {
            break;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("path", &self.path())
            .finish()
    }
}
