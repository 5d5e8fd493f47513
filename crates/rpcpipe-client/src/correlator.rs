//! Request/response correlation.
//!
//! Every outgoing request gets a fresh token (sent as `nonce`) and a pending
//! entry with a deadline. Inbound DATA messages are classified here: READY,
//! a response to a pending entry, a broadcast event, or noise.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::message::Message;

/// Settles the caller's future.
pub type Reply = oneshot::Sender<Result<Value>>;

/// An admitted request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub token: String,
    pub command: String,
    pub deadline: Instant,
    seq: u64,
    key: delay_queue::Key,
    reply: Reply,
}

/// How an inbound DATA message was handled.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// The READY dispatch; carries its `data`.
    Ready(Value),
    /// Settled the pending request with this token.
    Resolved(String),
    /// Broadcast event for the dispatch table.
    Event { evt: String, data: Value },
    /// Token matched nothing pending (late or duplicate response).
    Stale(String),
    /// Neither token nor event.
    Unroutable,
}

/// Pending-request table with deadlines.
#[derive(Debug)]
pub struct Correlator {
    pending: HashMap<String, PendingRequest>,
    deadlines: DelayQueue<String>,
    timeout: Duration,
    next_seq: u64,
}

impl Correlator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            deadlines: DelayQueue::new(),
            timeout,
            next_seq: 0,
        }
    }

    /// A token unique for the life of the process.
    pub fn next_token() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Track `token` until it is resolved, expires, or is rejected.
    pub fn register(&mut self, token: String, command: &str, reply: Reply) {
        let key = self.deadlines.insert(token.clone(), self.timeout);
        self.next_seq += 1;
        let entry = PendingRequest {
            token: token.clone(),
            command: command.to_string(),
            deadline: Instant::now() + self.timeout,
            seq: self.next_seq,
            key,
            reply,
        };
        debug!(%token, command, "request pending");
        self.pending.insert(token, entry);
    }

    /// Forget a pending entry without settling it.
    pub fn cancel(&mut self, token: &str) -> Option<PendingRequest> {
        let entry = self.pending.remove(token)?;
        self.deadlines.remove(&entry.key);
        Some(entry)
    }

    /// Settle a pending request. Returns false for unknown tokens.
    pub fn resolve(&mut self, token: &str, result: Result<Value>) -> bool {
        let Some(entry) = self.cancel(token) else {
            return false;
        };
        debug!(%token, command = %entry.command, ok = result.is_ok(), "request settled");
        // The caller may have stopped waiting.
        let _ = entry.reply.send(result);
        true
    }

    /// Classify an inbound message, settling its pending request if it has one.
    pub fn route(&mut self, msg: Message) -> Inbound {
        if msg.is_ready() {
            return Inbound::Ready(msg.into_data());
        }

        if let Some(token) = msg.nonce.clone() {
            if !self.pending.contains_key(&token) {
                debug!(%token, "response for unknown token dropped");
                return Inbound::Stale(token);
            }
            let result = match msg.error() {
                Some(err) => Err(ClientError::RequestFailed {
                    code: err.code,
                    message: err.message,
                }),
                None => Ok(msg.into_data()),
            };
            self.resolve(&token, result);
            return Inbound::Resolved(token);
        }

        match msg.evt {
            Some(evt) => Inbound::Event {
                evt,
                data: msg.data.unwrap_or(Value::Null),
            },
            None => {
                warn!(cmd = ?msg.cmd, "message without token or event dropped");
                Inbound::Unroutable
            }
        }
    }

    /// Wait for the next deadline to pass. Resolves to `None` when nothing
    /// is pending.
    pub async fn next_expired(&mut self) -> Option<String> {
        std::future::poll_fn(|cx| self.deadlines.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }

    /// Reject an expired entry with `RequestTimeout`.
    pub fn expire(&mut self, token: &str) {
        // The queue already dropped the deadline.
        let Some(entry) = self.pending.remove(token) else {
            return;
        };
        warn!(%token, command = %entry.command, timeout = ?self.timeout, "request timed out");
        let _ = entry.reply.send(Err(ClientError::RequestTimeout(self.timeout)));
    }

    /// Reject every pending request, oldest first, and clear the table.
    pub fn reject_all(&mut self, err: impl Fn() -> ClientError) -> usize {
        let mut entries: Vec<PendingRequest> = self.pending.drain().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        self.deadlines.clear();

        let count = entries.len();
        for entry in entries {
            let _ = entry.reply.send(Err(err()));
        }
        if count > 0 {
            debug!(count, "pending requests rejected");
        }
        count
    }

    pub fn contains(&self, token: &str) -> bool {
        self.pending.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
