use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use rpcpipe_frame::Opcode;
use rpcpipe_transport::{probe_for_alternate_endpoint, HyperProbe, ProbeConfig};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::config::ClientConfig;
use crate::dispatch::ListenerId;
use crate::driver::{ClientEvent, ClientStats, Command, Driver};
use crate::error::{ClientError, Result};
use crate::message::{fingerprint, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE};
use crate::session::SessionState;

const EVENT_CAPACITY: usize = 64;

/// Handle to a client. Cheap to clone; all clones share one connection.
///
/// The connection itself lives in a background task. When the last handle
/// (including any [`Subscription`]) is dropped, the session is closed and
/// the task exits.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<ClientEvent>,
    state: watch::Receiver<SessionState>,
    probe: ProbeConfig,
}

impl Client {
    /// Validate `config` and start the driver task. Does not connect.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state_tx, state) = watch::channel(SessionState::Disconnected);

        let driver = Driver::new(&config, commands_rx, events.clone(), state_tx);
        tokio::spawn(driver.run());
        debug!(client_id = %config.handshake.client_id, "client started");

        Ok(Self {
            commands,
            events,
            state,
            probe: config.probe,
        })
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Connect and wait for READY. Resolves to READY's `data`.
    ///
    /// Already ready: resolves immediately. Handshake in flight: joins it.
    pub async fn connect(&self) -> Result<Value> {
        self.call(|reply| Command::Connect { reply }).await?
    }

    /// Send a command and wait for its response `data`.
    pub async fn request(&self, command: &str, args: Value, evt: Option<&str>) -> Result<Value> {
        self.call(|reply| Command::Request {
            command: command.to_string(),
            args,
            evt: evt.map(str::to_string),
            reply,
        })
        .await?
    }

    /// Subscribe to `evt` with `args`; `handler` sees every delivered event's
    /// `data` until the returned [`Subscription`] is unsubscribed or dropped.
    pub async fn subscribe<F>(&self, evt: &str, args: Value, handler: F) -> Result<Subscription>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let key = fingerprint(evt, &args);
        let id = self
            .call(|reply| Command::AddHandler {
                evt: evt.to_string(),
                key,
                handler: Arc::new(handler),
                reply,
            })
            .await?;

        if let Err(err) = self.request(CMD_SUBSCRIBE, args.clone(), Some(evt)).await {
            let _ = self.commands.send(Command::RemoveHandler { id });
            return Err(err);
        }

        Ok(Subscription {
            client: self.clone(),
            evt: evt.to_string(),
            args,
            id,
            active: true,
        })
    }

    /// Send a raw frame with a JSON payload.
    pub async fn send(&self, opcode: Opcode, payload: Value) -> Result<()> {
        self.call(|reply| Command::Send {
            opcode,
            payload,
            reply,
        })
        .await?
    }

    /// Close gracefully and stop reconnecting until the next [`Client::connect`].
    pub async fn close(&self) -> Result<()> {
        self.call(|reply| Command::Close { reply }).await
    }

    /// Lifecycle notifications from now on.
    pub fn lifecycle(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Watch the session state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub async fn stats(&self) -> Result<ClientStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Look for the peer's HTTP side channel.
    pub async fn probe_alternate_endpoint(&self, max_attempts: u32) -> Result<SocketAddr> {
        let probe = HyperProbe::new(self.probe.attempt_timeout);
        Ok(probe_for_alternate_endpoint(&probe, &self.probe, max_attempts).await?)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.current_state())
            .finish()
    }
}

/// A live event subscription.
#[must_use = "dropping a Subscription removes its handler"]
pub struct Subscription {
    client: Client,
    evt: String,
    args: Value,
    id: ListenerId,
    active: bool,
}

impl Subscription {
    pub fn event(&self) -> &str {
        &self.evt
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Remove the handler. UNSUBSCRIBE goes out only when no other
    /// subscription with the same event and arguments is still live;
    /// otherwise this resolves to `null` without contacting the peer.
    pub async fn unsubscribe(mut self) -> Result<Value> {
        self.active = false;
        let id = self.id;
        let remaining = self
            .client
            .call(|reply| Command::ReleaseHandler { id, reply })
            .await?;
        if remaining > 0 {
            debug!(evt = %self.evt, remaining, "subscription still shared; UNSUBSCRIBE skipped");
            return Ok(Value::Null);
        }
        self.client
            .request(CMD_UNSUBSCRIBE, self.args.clone(), Some(&self.evt))
            .await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            let _ = self.client.commands.send(Command::RemoveHandler { id: self.id });
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("evt", &self.evt)
            .field("args", &self.args)
            .field("active", &self.active)
            .finish()
    }
}
