use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ClientError, Result};

/// Bounded-concurrency admission in first-come first-served order.
///
/// Each admitted request holds an [`Admission`]; the slot is freed when it is
/// dropped, whichever way the request ends.
#[derive(Debug, Clone)]
pub struct AdmissionQueue {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// One occupied slot.
#[derive(Debug)]
pub struct Admission {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionQueue {
    /// A bound of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Wait for a slot. Waiters are admitted in arrival order.
    pub async fn acquire(&self) -> Result<Admission> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ClientError::Closed)?;
        Ok(Admission { _permit: permit })
    }

    /// Run `fut` while holding a slot.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let _slot = self.acquire().await?;
        Ok(fut.await)
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent - self.slots.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
