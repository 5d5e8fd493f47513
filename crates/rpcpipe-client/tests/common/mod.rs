//! A scripted peer for driving a real [`Client`] over a Unix socket.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rpcpipe_client::{Client, ClientConfig, ClientEvent, Message, ReconnectPolicy};
use rpcpipe_frame::{Frame, Opcode, RpcCodec};
use rpcpipe_transport::{IpcListener, IpcStream};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::codec::Framed;

pub const WAIT: Duration = Duration::from_secs(5);

static NEXT_DIR: AtomicU32 = AtomicU32::new(0);

/// Fresh directory for one test's socket.
pub fn unique_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "rpcpipe-it-{tag}-{}-{}",
        std::process::id(),
        NEXT_DIR.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// Config aimed at `path` with quiet keep-alive and no reconnection.
pub fn config_for(path: &Path) -> ClientConfig {
    ClientConfig::new("integration")
        .with_endpoints([path.to_path_buf()])
        .with_request_timeout(Duration::from_secs(2))
        .with_keepalive_interval(Duration::from_secs(60))
        .with_handshake_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectPolicy::disabled())
}

/// Reconnection with short delays.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::default()
        .with_max_attempts(max_attempts)
        .with_delays(Duration::from_millis(10), Duration::from_millis(40))
}

pub struct Peer {
    framed: Framed<IpcStream, RpcCodec>,
}

impl Peer {
    pub async fn accept(listener: &IpcListener) -> Self {
        let stream = tokio::time::timeout(WAIT, listener.accept())
            .await
            .expect("client should connect")
            .expect("accept should succeed");
        Self {
            framed: Framed::new(stream, RpcCodec::default()),
        }
    }

    /// Next frame, or `None` at end of stream.
    pub async fn next(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.framed.next())
            .await
            .expect("peer timed out waiting for a frame")
            .map(|frame| frame.expect("client sent a malformed frame"))
    }

    /// True when nothing arrives within `window`.
    pub async fn quiet_for(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.framed.next()).await.is_err()
    }

    pub async fn recv(&mut self) -> Frame {
        self.next().await.expect("connection closed unexpectedly")
    }

    pub async fn expect_handshake(&mut self) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame.opcode, Opcode::Handshake);
        frame.decode_json().expect("handshake should be JSON")
    }

    /// Next DATA message, skipping keep-alive pings.
    pub async fn recv_message(&mut self) -> Message {
        loop {
            let frame = self.recv().await;
            match frame.opcode {
                Opcode::Ping => continue,
                Opcode::Data => return frame.decode_json().expect("DATA should be a message"),
                other => panic!("expected DATA, got {other}"),
            }
        }
    }

    pub async fn send(&mut self, opcode: Opcode, value: &Value) {
        let frame = Frame::json(opcode, value).expect("frame should encode");
        self.framed.send(frame).await.expect("peer write should succeed");
    }

    pub async fn send_message(&mut self, msg: &Message) {
        let value = serde_json::to_value(msg).expect("message should serialize");
        self.send(Opcode::Data, &value).await;
    }

    pub async fn send_ready(&mut self) {
        self.send_message(&Message::ready(json!({"v": 1, "user": {"id": "42"}})))
            .await;
    }

    /// Answer `request` with `data`, echoing its command and nonce.
    pub async fn reply(&mut self, request: &Message, data: Value) {
        let nonce = request.nonce.as_deref().expect("request should carry a nonce");
        self.send_message(&Message::response(request.cmd.as_deref(), nonce, data))
            .await;
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("raw write should succeed");
        stream.flush().await.expect("flush should succeed");
    }
}

/// Handshake then READY.
pub async fn accept_ready(listener: &IpcListener) -> Peer {
    let mut peer = Peer::accept(listener).await;
    peer.expect_handshake().await;
    peer.send_ready().await;
    peer
}

/// A bound listener, a client aimed at it, and the connected peer.
pub async fn connected(tag: &str, config: impl FnOnce(ClientConfig) -> ClientConfig) -> Harness {
    let dir = unique_dir(tag);
    let sock = dir.join("peer.sock");
    let listener = IpcListener::bind(&sock).expect("listener should bind");
    let client = Client::new(config(config_for(&sock))).expect("config should be valid");
    let events = client.lifecycle();

    let (ready, peer) = tokio::join!(client.connect(), accept_ready(&listener));
    ready.expect("connect should reach READY");

    Harness {
        dir,
        listener: Some(listener),
        client,
        peer,
        events,
    }
}

pub struct Harness {
    pub dir: PathBuf,
    pub listener: Option<IpcListener>,
    pub client: Client,
    pub peer: Peer,
    pub events: broadcast::Receiver<ClientEvent>,
}

impl Harness {
    pub fn listener(&self) -> &IpcListener {
        self.listener.as_ref().expect("listener still bound")
    }
}

pub fn cleanup(dir: &Path) {
    let _ = std::fs::remove_dir_all(dir);
}

pub async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no lifecycle event in time")
        .expect("lifecycle channel should stay open")
}

/// Skip events until one matches.
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    matches: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
