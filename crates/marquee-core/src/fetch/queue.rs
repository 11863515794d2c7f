//! Operation queue - schedules fetch operations with bounded concurrency

use super::FetchOperation;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Default number of operations executing at once
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Owns submitted operations and starts them as capacity frees up
pub struct FetchQueue {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    operations: Arc<Mutex<Vec<FetchOperation>>>,
}

impl FetchQueue {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            operations: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Submit an operation; it starts once a slot is free
    ///
    /// Operations cancelled while waiting for a slot are never started.
    pub fn add(&self, operation: FetchOperation) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("fetch queue requires a tokio runtime".to_string()))?;

        if !operation.is_ready() {
            return Err(Error::InvalidStateTransition {
                from: operation.state().to_string(),
                to: "queued".to_string(),
            });
        }

        {
            let mut operations = self.operations.lock();
            operations.retain(|op| !op.is_finished());
            operations.push(operation.clone());
        }

        debug!(operation = %operation.id(), url = %operation.url(), "Operation queued");

        let permits = self.permits.clone();
        runtime.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            if !operation.is_ready() {
                debug!(operation = %operation.id(), state = %operation.state(), "Skipping operation");
                return;
            }

            if let Err(e) = operation.start() {
                // Lost a race with cancel()
                debug!(operation = %operation.id(), error = %e, "Queued operation did not start");
                return;
            }

            // Hold the slot until the operation is done
            let _ = operation.wait().await;
        });

        Ok(())
    }

    /// Number of operations not yet finished
    pub fn operation_count(&self) -> usize {
        self.operations.lock().iter().filter(|op| !op.is_finished()).count()
    }

    /// Snapshot of the operations not yet finished
    pub fn operations(&self) -> Vec<FetchOperation> {
        self.operations
            .lock()
            .iter()
            .filter(|op| !op.is_finished())
            .cloned()
            .collect()
    }

    /// Cancel every queued or executing operation
    pub fn cancel_all(&self) {
        let operations: Vec<_> = self.operations.lock().drain(..).collect();
        let cancelled = operations.iter().filter(|op| op.cancel()).count();
        info!(cancelled, "Fetch queue cancelled");
    }

    /// Wait until every submitted operation has finished
    pub async fn wait_until_all_finished(&self) {
        let pending = self.operations();
        for operation in pending {
            if let Err(e) = operation.wait().await {
                warn!(operation = %operation.id(), error = %e, "Queued operation did not succeed");
            }
        }
        self.operations.lock().retain(|op| !op.is_finished());
    }
}

impl Default for FetchQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchRequest;
    use url::Url;

    fn operation() -> FetchOperation {
        FetchOperation::new(FetchRequest::new(Url::parse("http://127.0.0.1:9/poster.png").unwrap()))
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(FetchQueue::new(0).max_concurrent(), 1);
        assert_eq!(FetchQueue::default().max_concurrent(), DEFAULT_MAX_CONCURRENT);
    }

    #[tokio::test]
    async fn test_cancelled_operation_is_not_started() {
        let queue = FetchQueue::new(1);
        let op = operation();
        op.cancel();

        assert!(queue.add(op.clone()).is_err());
        assert_eq!(queue.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_all_finishes_everything() {
        let queue = FetchQueue::new(1);
        let ops: Vec<_> = (0..3).map(|_| operation()).collect();
        for op in &ops {
            queue.add(op.clone()).unwrap();
        }

        queue.cancel_all();
        queue.wait_until_all_finished().await;

        assert!(ops.iter().all(|op| op.is_finished()));
        assert_eq!(queue.operation_count(), 0);
    }
}
