//! Admission control, batching and caching in front of a [`Client`].
//!
//! All three are opt-in and composed by [`Pipeline`]; the client itself
//! never consults them.

pub mod batch;
pub mod cache;
pub mod queue;

use std::future::Future;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::trace;

pub use batch::{BatchConfig, Batcher};
pub use cache::ResponseCache;
pub use queue::{Admission, AdmissionQueue};

use crate::client::Client;
use crate::error::Result;
use crate::message::fingerprint;

/// One command to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub command: String,
    pub args: Value,
    pub evt: Option<String>,
}

impl RequestSpec {
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            command: command.into(),
            args,
            evt: None,
        }
    }

    pub fn with_event(mut self, evt: impl Into<String>) -> Self {
        self.evt = Some(evt.into());
        self
    }

    /// Cache key: event name (or command) plus canonical arguments.
    pub fn cache_key(&self) -> String {
        fingerprint(self.evt.as_deref().unwrap_or(&self.command), &self.args)
    }
}

/// Something that can issue a request and await its response.
pub trait Issue: Clone + Send + Sync + 'static {
    fn issue(&self, request: RequestSpec) -> impl Future<Output = Result<Value>> + Send;
}

impl Issue for Client {
    async fn issue(&self, request: RequestSpec) -> Result<Value> {
        self.request(&request.command, request.args, request.evt.as_deref())
            .await
    }
}

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Requests allowed in flight at once.
    pub max_concurrent: usize,
    /// Debounce window for `batch_request`; `None` issues immediately.
    pub batch: Option<BatchConfig>,
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            batch: None,
            cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Admission queue, optional batch aggregator and response cache composed
/// in front of an issuer.
#[derive(Debug)]
pub struct Pipeline<I: Issue = Client> {
    issuer: I,
    queue: AdmissionQueue,
    batcher: Option<Batcher>,
    cache: ResponseCache,
}

impl<I: Issue> Pipeline<I> {
    /// Must be called within a Tokio runtime when batching is enabled.
    pub fn new(issuer: I, config: PipelineConfig) -> Self {
        let queue = AdmissionQueue::new(config.max_concurrent);
        let batcher = config
            .batch
            .map(|batch| Batcher::spawn(issuer.clone(), queue.clone(), batch));
        Self {
            issuer,
            queue,
            batcher,
            cache: ResponseCache::new(config.cache_ttl),
        }
    }

    /// Issue one request once a slot is free.
    pub async fn request(&self, request: RequestSpec) -> Result<Value> {
        self.queue.run(self.issuer.issue(request)).await?
    }

    /// Issue several requests; results come back in input order.
    ///
    /// With batching enabled the requests join the pending batch and go out
    /// when its window closes.
    pub async fn batch_request(&self, requests: Vec<RequestSpec>) -> Vec<Result<Value>> {
        match &self.batcher {
            Some(batcher) => join_all(requests.into_iter().map(|r| batcher.submit(r))).await,
            None => join_all(requests.into_iter().map(|r| self.request(r))).await,
        }
    }

    /// Serve from the cache when fresh, otherwise issue and cache the result.
    /// Failures are not cached.
    pub async fn cached_request(&self, request: RequestSpec) -> Result<Value> {
        let key = request.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            trace!(%key, "cache hit");
            return Ok(hit);
        }
        let value = self.request(request).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    pub fn issuer(&self) -> &I {
        &self.issuer
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use tokio::time::Instant;

    use super::{Issue, RequestSpec};
    use crate::error::{ClientError, Result};

    /// Records every issued request; `FAIL` fails, anything else echoes.
    #[derive(Clone, Default)]
    pub(crate) struct Recorder {
        pub(crate) calls: Arc<Mutex<Vec<(String, Instant)>>>,
    }

    impl Recorder {
        pub(crate) fn commands(&self) -> Vec<String> {
            self.calls.lock().iter().map(|(c, _)| c.clone()).collect()
        }
    }

    impl Issue for Recorder {
        async fn issue(&self, request: RequestSpec) -> Result<Value> {
            self.calls.lock().push((request.command.clone(), Instant::now()));
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if request.command == "FAIL" {
                return Err(ClientError::RequestFailed {
                    code: 1,
                    message: "requested failure".into(),
                });
            }
            Ok(json!({ "echo": request.command, "args": request.args }))
        }
    }
}
