use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::queue::AdmissionQueue;
use super::{Issue, RequestSpec};
use crate::error::{ClientError, Result};

/// Debounce window for the batch aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(50),
        }
    }
}

struct BatchItem {
    request: RequestSpec,
    settle: oneshot::Sender<Result<Value>>,
}

/// Buffers requests and issues them together once no new request has
/// arrived for `delay`. Each caller gets its own result.
///
/// The aggregator task stops once every `Batcher` clone is dropped, after
/// flushing whatever is buffered.
#[derive(Debug, Clone)]
pub struct Batcher {
    tx: mpsc::UnboundedSender<BatchItem>,
}

impl Batcher {
    /// Must be called within a Tokio runtime.
    pub fn spawn<I: Issue>(issuer: I, queue: AdmissionQueue, config: BatchConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(aggregate(issuer, queue, config.delay, rx));
        Self { tx }
    }

    /// Add a request to the current batch and wait for its result.
    pub async fn submit(&self, request: RequestSpec) -> Result<Value> {
        let (settle, rx) = oneshot::channel();
        self.tx
            .send(BatchItem { request, settle })
            .map_err(|_| ClientError::Closed)?;
        rx.await.map_err(|_| ClientError::Closed)?
    }
}

async fn aggregate<I: Issue>(
    issuer: I,
    queue: AdmissionQueue,
    delay: Duration,
    mut rx: mpsc::UnboundedReceiver<BatchItem>,
) {
    let mut buffer = Vec::new();
    let window = sleep(delay);
    tokio::pin!(window);

    loop {
        tokio::select! {
            item = rx.recv() => match item {
                Some(item) => {
                    buffer.push(item);
                    window.as_mut().reset(Instant::now() + delay);
                }
                None => break,
            },
            () = &mut window, if !buffer.is_empty() => {
                flush(&issuer, &queue, std::mem::take(&mut buffer));
            }
        }
    }

    if !buffer.is_empty() {
        flush(&issuer, &queue, buffer);
    }
}

/// Issue every buffered request concurrently.
fn flush<I: Issue>(issuer: &I, queue: &AdmissionQueue, items: Vec<BatchItem>) {
    debug!(size = items.len(), "flushing batch");
    for item in items {
        let issuer = issuer.clone();
        let queue = queue.clone();
        tokio::spawn(async move {
            let result = queue.run(issuer.issue(item.request)).await.and_then(|r| r);
            let _ = item.settle.send(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::controls::fake::Recorder;

    fn spec(command: &str) -> RequestSpec {
        RequestSpec::new(command, json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_on_each_arrival() {
        let recorder = Recorder::default();
        let batcher = Batcher::spawn(
            recorder.clone(),
            AdmissionQueue::new(10),
            BatchConfig {
                delay: Duration::from_millis(50),
            },
        );
        let start = Instant::now();

        let mut tasks = Vec::new();
        for name in ["A", "B", "C"] {
            let batcher = batcher.clone();
            tasks.push(tokio::spawn(async move { batcher.submit(spec(name)).await }));
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(recorder.commands().is_empty(), "flushed before window closed");
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        assert_eq!(
            results.iter().map(|r| r["echo"].clone()).collect::<Vec<_>>(),
            vec![json!("A"), json!("B"), json!("C")]
        );

        // Last arrival at t=40ms, so the batch went out at t=90ms.
        let calls = recorder.calls.lock().clone();
        assert_eq!(calls.len(), 3);
        for (_, at) in &calls {
            let elapsed = *at - start;
            assert!(
                elapsed >= Duration::from_millis(90) && elapsed < Duration::from_millis(95),
                "issued at {elapsed:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failures_settle_only_their_caller() {
        let recorder = Recorder::default();
        let batcher = Batcher::spawn(recorder, AdmissionQueue::new(10), BatchConfig::default());

        let (ok, failed) = tokio::join!(batcher.submit(spec("A")), batcher.submit(spec("FAIL")));
        assert_eq!(ok.unwrap()["echo"], "A");
        assert!(matches!(failed, Err(ClientError::RequestFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_make_separate_batches() {
        let recorder = Recorder::default();
        let batcher = Batcher::spawn(recorder.clone(), AdmissionQueue::new(10), BatchConfig::default());

        batcher.submit(spec("FIRST")).await.unwrap();
        batcher.submit(spec("SECOND")).await.unwrap();

        let calls = recorder.calls.lock().clone();
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_admission_bound() {
        let recorder = Recorder::default();
        let queue = AdmissionQueue::new(1);
        let batcher = Batcher::spawn(recorder.clone(), queue.clone(), BatchConfig::default());

        let results = futures_util::future::join_all((0..3).map(|i| batcher.submit(spec(&format!("R{i}"))))).await;
        assert!(results.iter().all(Result::is_ok));

        // One at a time: each issue waits for the previous 5ms call.
        let calls = recorder.calls.lock().clone();
        assert!(calls[1].1 - calls[0].1 >= Duration::from_millis(5));
        assert!(calls[2].1 - calls[1].1 >= Duration::from_millis(5));
        assert_eq!(queue.in_flight(), 0);
    }
}
