//! The task that owns a client's connection state.
//!
//! [`crate::Client`] handles only send [`Command`]s; the driver is the single
//! owner of the session, the pending table, the dispatch table and the
//! reconnect supervisor, and is the only place any of them is mutated.

use std::time::Duration;

use rpcpipe_frame::{Frame, FrameError, Opcode};
use rpcpipe_transport::EndpointResolver;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::control::{keepalive_ping, ClosePayload};
use crate::correlator::{Correlator, Inbound, Reply};
use crate::dispatch::{DispatchTable, EventHandler, ListenerId};
use crate::error::{ClientError, Result};
use crate::message::Message;
use crate::reconnect::{ReconnectDecision, Supervisor};
use crate::session::{Session, SessionState};

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Reconnected,
    ReconnectExhausted { attempts: u32 },
    Closed,
    Error { message: String },
}

/// Point-in-time view of the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub state: SessionState,
    pub pending: usize,
    pub subscriptions: usize,
    pub reconnect_attempts: u32,
}

pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<Result<Value>>,
    },
    Request {
        command: String,
        args: Value,
        evt: Option<String>,
        reply: Reply,
    },
    AddHandler {
        evt: String,
        key: String,
        handler: EventHandler,
        reply: oneshot::Sender<ListenerId>,
    },
    RemoveHandler {
        id: ListenerId,
    },
    /// Remove a handler; replies with how many remain under its key.
    ReleaseHandler {
        id: ListenerId,
        reply: oneshot::Sender<usize>,
    },
    Send {
        opcode: Opcode,
        payload: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<ClientStats>,
    },
}

pub(crate) struct Driver {
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<ClientEvent>,
    session: Session,
    correlator: Correlator,
    supervisor: Supervisor,
    dispatch: DispatchTable,
    keepalive: Option<Interval>,
    keepalive_every: Duration,
    ping_seq: u64,
    handshake_timeout: Duration,
    handshake_deadline: Option<Instant>,
    connect_waiters: Vec<oneshot::Sender<Result<Value>>>,
    ready_data: Option<Value>,
}

impl Driver {
    pub(crate) fn new(
        config: &ClientConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        events: broadcast::Sender<ClientEvent>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        Self {
            commands,
            events,
            session: Session::new(
                EndpointResolver::new(config.endpoint.clone()),
                config.handshake.clone(),
                config.frame.clone(),
                state_tx,
            ),
            correlator: Correlator::new(config.request_timeout),
            supervisor: Supervisor::new(config.reconnect.clone()),
            dispatch: DispatchTable::new(),
            keepalive: None,
            keepalive_every: config.keepalive_interval,
            ping_seq: 0,
            handshake_timeout: config.handshake.timeout,
            handshake_deadline: None,
            connect_waiters: Vec::new(),
            ready_data: None,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("driver started");
        loop {
            let handshake_deadline = self.handshake_deadline;
            let reconnect_at = self.supervisor.due();
            let reading = self.session.is_active();
            let ready = self.session.state() == SessionState::Ready;
            let expiring = !self.correlator.is_empty();

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                read = self.session.recv(), if reading => self.handle_read(read).await,
                () = tick(&mut self.keepalive), if ready => self.send_keepalive().await,
                Some(token) = self.correlator.next_expired(), if expiring => {
                    self.correlator.expire(&token);
                }
                () = sleep_until(handshake_deadline.unwrap_or_else(Instant::now)),
                    if handshake_deadline.is_some() => self.handshake_timed_out(),
                () = sleep_until(reconnect_at.unwrap_or_else(Instant::now)),
                    if reconnect_at.is_some() => self.reconnect_now().await,
            }
        }

        debug!("all client handles dropped");
        if self.session.is_active() {
            self.close_session().await;
        }
    }

    fn emit(&self, event: ClientEvent) {
        trace!(?event, "lifecycle");
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { reply } => self.connect(reply).await,
            Command::Request {
                command,
                args,
                evt,
                reply,
            } => self.request(command, args, evt, reply).await,
            Command::AddHandler {
                evt,
                key,
                handler,
                reply,
            } => {
                let id = self.dispatch.add(&evt, key, handler);
                let _ = reply.send(id);
            }
            Command::RemoveHandler { id } => {
                self.dispatch.remove(id);
            }
            Command::ReleaseHandler { id, reply } => {
                let remaining = self
                    .dispatch
                    .remove(id)
                    .map_or(0, |key| self.dispatch.count_for_key(&key));
                let _ = reply.send(remaining);
            }
            Command::Send {
                opcode,
                payload,
                reply,
            } => {
                let result = self.session.send_json(opcode, &payload).await;
                if let Err(err) = &result {
                    if breaks_connection(err) {
                        self.connection_lost(err.to_string());
                    }
                }
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.close_session().await;
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(ClientStats {
                    state: self.session.state(),
                    pending: self.correlator.len(),
                    subscriptions: self.dispatch.len(),
                    reconnect_attempts: self.supervisor.state().attempts,
                });
            }
        }
    }

    async fn connect(&mut self, reply: oneshot::Sender<Result<Value>>) {
        match self.session.state() {
            SessionState::Ready => {
                let _ = reply.send(Ok(self.ready_data.clone().unwrap_or(Value::Null)));
                return;
            }
            SessionState::HandshakeSent => {
                self.connect_waiters.push(reply);
                return;
            }
            _ => {}
        }
        if self.supervisor.is_reconnecting() {
            self.connect_waiters.push(reply);
            return;
        }

        match self.session.connect().await {
            Ok(_) => {
                self.handshake_deadline = Some(Instant::now() + self.handshake_timeout);
                self.connect_waiters.push(reply);
            }
            Err(err) => {
                warn!(%err, "connect failed");
                let _ = reply.send(Err(err));
            }
        }
    }

    async fn request(&mut self, command: String, args: Value, evt: Option<String>, reply: Reply) {
        if !self.session.state().can_send() {
            let _ = reply.send(Err(ClientError::NotConnected));
            return;
        }

        let token = Correlator::next_token();
        let msg = Message::request(&command, args, evt.as_deref(), &token);
        self.correlator.register(token.clone(), &command, reply);

        if let Err(err) = self.session.send_json(Opcode::Data, &msg).await {
            let fatal = breaks_connection(&err);
            let reason = err.to_string();
            self.correlator.resolve(&token, Err(err));
            if fatal {
                self.connection_lost(reason);
            }
        }
    }

    async fn handle_read(&mut self, read: Result<Vec<Frame>>) {
        let frames = match read {
            Ok(frames) => frames,
            Err(err) => {
                if err.is_protocol_violation() {
                    warn!(%err, "protocol violation; dropping connection");
                    self.emit(ClientEvent::Error {
                        message: err.to_string(),
                    });
                }
                self.connection_lost(err.to_string());
                return;
            }
        };

        for frame in frames {
            self.handle_frame(frame).await;
            if !self.session.is_active() {
                break;
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.opcode {
            Opcode::Data => match frame.decode_json::<Message>() {
                Ok(msg) => self.handle_message(msg),
                Err(err) => warn!(%err, "DATA payload is not a message object"),
            },
            Opcode::Ping => {
                if let Err(err) = self.session.send_raw(Opcode::Pong, &frame.payload).await {
                    self.connection_lost(err.to_string());
                }
            }
            Opcode::Pong => trace!(len = frame.payload.len(), "pong"),
            Opcode::Close => {
                let close = frame
                    .decode_json::<Value>()
                    .map(|v| ClosePayload::from_value(&v))
                    .unwrap_or_else(|_| ClosePayload::new(0, ""));
                info!(code = close.code, message = %close.message, "peer closed connection");
                self.connection_lost(format!("peer closed ({}): {}", close.code, close.message));
            }
            Opcode::Handshake => warn!("unexpected HANDSHAKE from peer"),
        }
    }

    fn handle_message(&mut self, msg: Message) {
        match self.correlator.route(msg) {
            Inbound::Ready(data) => self.on_ready(data),
            Inbound::Event { evt, data } => {
                let delivered = self.dispatch.emit(&evt, &data);
                trace!(%evt, delivered, "event dispatched");
            }
            Inbound::Resolved(_) | Inbound::Stale(_) | Inbound::Unroutable => {}
        }
    }

    fn on_ready(&mut self, data: Value) {
        if self.session.state() != SessionState::HandshakeSent {
            debug!(state = %self.session.state(), "READY ignored");
            return;
        }
        self.session.mark_ready();
        self.handshake_deadline = None;

        let mut keepalive = interval_at(Instant::now() + self.keepalive_every, self.keepalive_every);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.keepalive = Some(keepalive);

        let reconnected = self.supervisor.on_ready();
        info!(path = ?self.session.path(), reconnected, "session ready");
        self.emit(ClientEvent::Connected);
        if reconnected {
            self.emit(ClientEvent::Reconnected);
        }

        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Ok(data.clone()));
        }
        self.ready_data = Some(data);
    }

    async fn send_keepalive(&mut self) {
        self.ping_seq += 1;
        let ping = keepalive_ping(self.ping_seq);
        match self.session.send_json(Opcode::Ping, &ping).await {
            Ok(()) => trace!(seq = self.ping_seq, "ping sent"),
            Err(err) => {
                warn!(%err, "keep-alive failed");
                self.connection_lost(err.to_string());
            }
        }
    }

    fn handshake_timed_out(&mut self) {
        warn!(timeout = ?self.handshake_timeout, "no READY before handshake deadline");
        self.connection_lost(format!("no READY within {:?}", self.handshake_timeout));
    }

    /// Abrupt loss of the session: reject everything in flight, then let the
    /// supervisor decide what happens next.
    fn connection_lost(&mut self, reason: String) {
        let previous = self.session.state();
        self.session.disconnect();
        self.keepalive = None;
        self.handshake_deadline = None;
        self.ready_data = None;

        let rejected = self.correlator.reject_all(|| ClientError::ConnectionLost);
        warn!(%reason, state = %previous, rejected, "disconnected");
        self.emit(ClientEvent::Disconnected {
            reason: reason.clone(),
        });

        let now = Instant::now();
        let decision = if self.supervisor.is_reconnecting() {
            self.supervisor.attempt_failed(now)
        } else if previous == SessionState::Ready {
            self.supervisor.on_disconnected(now)
        } else {
            ReconnectDecision::Idle
        };
        self.apply(decision, || ClientError::HandshakeFailed(reason.clone()));
    }

    async fn reconnect_now(&mut self) {
        self.supervisor.begin_attempt();
        let attempt = self.supervisor.state().attempts;
        info!(attempt, "reconnecting");

        match self.session.connect().await {
            Ok(path) => {
                debug!(?path, attempt, "reconnect handshake sent");
                self.handshake_deadline = Some(Instant::now() + self.handshake_timeout);
            }
            Err(err) => {
                warn!(attempt, %err, "reconnect attempt failed");
                let reason = err.to_string();
                let decision = self.supervisor.attempt_failed(Instant::now());
                self.apply(decision, || ClientError::ConnectionFailed(reason.clone()));
            }
        }
    }

    fn apply(&mut self, decision: ReconnectDecision, waiter_err: impl Fn() -> ClientError) {
        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                self.emit(ClientEvent::Reconnecting { attempt, delay });
            }
            ReconnectDecision::Exhausted { attempts } => {
                self.emit(ClientEvent::ReconnectExhausted { attempts });
                self.fail_waiters(|| ClientError::ReconnectExhausted { attempts });
            }
            ReconnectDecision::Idle => {
                if !self.supervisor.is_reconnecting() {
                    self.fail_waiters(waiter_err);
                }
            }
        }
    }

    fn fail_waiters(&mut self, err: impl Fn() -> ClientError) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(Err(err()));
        }
    }

    async fn close_session(&mut self) {
        self.supervisor.disarm();
        self.keepalive = None;
        self.handshake_deadline = None;
        self.ready_data = None;

        let rejected = self.correlator.reject_all(|| ClientError::ConnectionLost);
        self.fail_waiters(|| ClientError::Closed);
        self.session.close(&ClosePayload::normal()).await;
        info!(rejected, "client closed");
        self.emit(ClientEvent::Closed);
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Write failures that leave the stream unusable.
fn breaks_connection(err: &ClientError) -> bool {
    matches!(
        err,
        ClientError::Frame(FrameError::Io(_) | FrameError::ConnectionClosed)
    )
}
