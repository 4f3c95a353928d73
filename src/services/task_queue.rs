//! Batch task queue
//!
//! Batches run detached from the request that started them. The queue owns
//! every spawned batch so shutdown can drain them, and each submission hands
//! back a [`BatchHandle`] whose completion can be awaited.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, Semaphore, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::models::workflow_batch::BatchStatus;
use crate::repositories::{BatchCounts, BatchLedger};

/// Final state of a batch as reported to its handle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub success_count: i32,
    pub failed_count: i32,
    pub skipped_count: i32,
}

impl BatchOutcome {
    pub fn new(batch_id: Uuid, status: BatchStatus, counts: BatchCounts) -> Self {
        Self {
            batch_id,
            status,
            success_count: counts.success,
            failed_count: counts.failed,
            skipped_count: counts.skipped,
        }
    }
}

/// Concurrency of a batch: the requested value (or `default`), capped at `max`.
pub fn resolve_concurrency(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested
        .filter(|value| *value > 0)
        .unwrap_or(default)
        .min(max)
        .max(1)
}

/// Outcome of one batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }
}

/// Per-item entry of a batch's `details`
pub trait BatchItem: Serialize + Send + 'static {
    fn status(&self) -> ItemStatus;
}

/// Counts and per-item details accumulated by a running batch, in completion order
#[derive(Debug)]
pub struct Tally<T> {
    pub counts: BatchCounts,
    pub items: Vec<T>,
}

impl<T> Default for Tally<T> {
    fn default() -> Self {
        Self {
            counts: BatchCounts::default(),
            items: Vec::new(),
        }
    }
}

impl<T: Serialize> Tally<T> {
    pub fn record(&mut self, status: ItemStatus, item: T) {
        match status {
            ItemStatus::Success => self.counts.success += 1,
            ItemStatus::Failed => self.counts.failed += 1,
            ItemStatus::Skipped => self.counts.skipped += 1,
        }
        self.items.push(item);
    }

    pub fn details(&self) -> JsonValue {
        serde_json::to_value(&self.items).unwrap_or_else(|_| JsonValue::Array(Vec::new()))
    }
}

/// Run `process` over `items` with at most `concurrency` items in flight.
///
/// Permits are taken before each item is spawned, progress is written after
/// every item, and the batch is finalized once all items are joined. `kind`
/// labels logs and metrics.
pub async fn fan_out<I, R, L, F, Fut>(
    kind: &'static str,
    batch_id: Uuid,
    ledger: L,
    items: Vec<I>,
    concurrency: usize,
    process: F,
) -> BatchOutcome
where
    I: Send + 'static,
    R: BatchItem,
    L: BatchLedger,
    F: Fn(I) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let timer = Instant::now();
    if let Err(err) = ledger.mark_running(batch_id).await {
        warn!(%batch_id, kind, error = %err, "Failed to mark batch running");
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let tally = Arc::new(Mutex::new(Tally::<R>::default()));

    let mut handles = Vec::with_capacity(items.len());
    for item in items {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                error!(%batch_id, kind, error = %err, "Batch semaphore closed");
                break;
            }
        };

        let ledger = ledger.clone();
        let tally = tally.clone();
        let process = process.clone();
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let result = process(item).await;
            let status = result.status();
            counter!("batch_items_total", "kind" => kind, "status" => status.as_str()).increment(1);

            let mut tally = tally.lock().await;
            tally.record(status, result);
            if let Err(err) = ledger.record_progress(batch_id, tally.counts).await {
                warn!(%batch_id, kind, error = %err, "Failed to record batch progress");
            }
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            error!(%batch_id, kind, error = %err, "Batch item task failed");
        }
    }

    let tally = tally.lock().await;
    let counts = tally.counts;
    let status = BatchStatus::from_counts(counts.success, counts.failed);
    if let Err(err) = ledger
        .finish(batch_id, status, counts, tally.details())
        .await
    {
        error!(%batch_id, kind, error = %err, "Failed to finalize batch");
    }

    let elapsed = timer.elapsed().as_secs_f64();
    histogram!("batch_duration_seconds", "kind" => kind).record(elapsed);
    info!(
        %batch_id,
        kind,
        status = ?status,
        success = counts.success,
        failed = counts.failed,
        skipped = counts.skipped,
        "Batch finished in {:.2}s",
        elapsed
    );

    BatchOutcome::new(batch_id, status, counts)
}

/// Completion handle of a submitted batch. Dropping it does not cancel the batch.
#[derive(Debug)]
pub struct BatchHandle {
    batch_id: Uuid,
    done: oneshot::Receiver<BatchOutcome>,
}

impl BatchHandle {
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Wait for the batch to finish. `None` if the batch task panicked.
    pub async fn wait(self) -> Option<BatchOutcome> {
        self.done.await.ok()
    }
}

#[derive(Clone, Default)]
pub struct BatchQueue {
    tracker: TaskTracker,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Spawn `work` as a tracked batch task.
    pub fn submit<F>(&self, batch_id: Uuid, work: F) -> ServiceResult<BatchHandle>
    where
        F: Future<Output = BatchOutcome> + Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(ServiceError::Internal(
                "batch queue is shutting down".to_string(),
            ));
        }

        let (tx, rx) = oneshot::channel();
        self.tracker.spawn(async move {
            let outcome = work.await;
            if tx.send(outcome).is_err() {
                debug!(%batch_id, "Batch finished with no waiter");
            }
        });

        Ok(BatchHandle { batch_id, done: rx })
    }

    /// Number of batches still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Refuse new batches and wait for running ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            warn!(in_flight = self.tracker.len(), "Waiting for running batches");
        }
        self.tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sea_orm::DbErr;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct MemoryLedger {
        progress: Arc<StdMutex<Vec<BatchCounts>>>,
        finished: Arc<StdMutex<Option<(BatchStatus, BatchCounts, JsonValue)>>>,
    }

    #[async_trait]
    impl BatchLedger for MemoryLedger {
        async fn mark_running(&self, _batch_id: Uuid) -> Result<(), DbErr> {
            Ok(())
        }

        async fn record_progress(&self, _batch_id: Uuid, counts: BatchCounts) -> Result<(), DbErr> {
            self.progress.lock().unwrap().push(counts);
            Ok(())
        }

        async fn finish(
            &self,
            _batch_id: Uuid,
            status: BatchStatus,
            counts: BatchCounts,
            details: JsonValue,
        ) -> Result<(), DbErr> {
            *self.finished.lock().unwrap() = Some((status, counts, details));
            Ok(())
        }
    }

    #[derive(Serialize)]
    struct Item {
        id: u32,
        status: ItemStatus,
    }

    impl BatchItem for Item {
        fn status(&self) -> ItemStatus {
            self.status
        }
    }

    #[test]
    fn test_resolve_concurrency() {
        assert_eq!(resolve_concurrency(None, 1, 20), 1);
        assert_eq!(resolve_concurrency(Some(0), 10, 20), 10);
        assert_eq!(resolve_concurrency(Some(50), 1, 20), 20);
        assert_eq!(resolve_concurrency(Some(4), 1, 20), 4);
        assert_eq!(resolve_concurrency(None, 0, 20), 1);
    }

    #[test]
    fn test_tally_counts_by_status() {
        let mut tally = Tally::default();
        tally.record(ItemStatus::Success, "a");
        tally.record(ItemStatus::Skipped, "b");
        tally.record(ItemStatus::Failed, "c");
        tally.record(ItemStatus::Success, "d");

        assert_eq!(
            tally.counts,
            BatchCounts {
                success: 2,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(tally.details(), serde_json::json!(["a", "b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_fan_out_bounds_concurrency_and_finalizes() {
        let ledger = MemoryLedger::default();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let outcome = {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            fan_out(
                "test",
                Uuid::new_v4(),
                ledger.clone(),
                (1..=6).collect(),
                2,
                move |id: u32| {
                    let in_flight = in_flight.clone();
                    let peak = peak.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        let status = if id % 3 == 0 {
                            ItemStatus::Skipped
                        } else {
                            ItemStatus::Success
                        };
                        Item { id, status }
                    }
                },
            )
            .await
        };

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.success_count, 4);
        assert_eq!(outcome.skipped_count, 2);
        assert_eq!(ledger.progress.lock().unwrap().len(), 6);

        let (status, counts, details) = ledger.finished.lock().unwrap().clone().unwrap();
        assert_eq!(status, BatchStatus::Completed);
        assert_eq!(counts.processed(), 6);
        assert_eq!(details.as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_fan_out_with_only_failures_fails_the_batch() {
        let ledger = MemoryLedger::default();

        let outcome = fan_out(
            "test",
            Uuid::new_v4(),
            ledger.clone(),
            vec![1, 2],
            4,
            |id: u32| async move {
                Item {
                    id,
                    status: ItemStatus::Failed,
                }
            },
        )
        .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.failed_count, 2);
    }

    #[tokio::test]
    async fn test_handle_receives_outcome() {
        let queue = BatchQueue::new();
        let batch_id = Uuid::new_v4();

        let handle = queue
            .submit(batch_id, async move {
                BatchOutcome::new(
                    batch_id,
                    BatchStatus::Completed,
                    BatchCounts {
                        success: 2,
                        failed: 0,
                        skipped: 1,
                    },
                )
            })
            .unwrap();

        assert_eq!(handle.batch_id(), batch_id);
        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status, BatchStatus::Completed);
        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.skipped_count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects_new_work() {
        let queue = BatchQueue::new();
        let batch_id = Uuid::new_v4();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = queue
            .submit(batch_id, async move {
                let _ = release_rx.await;
                BatchOutcome::new(batch_id, BatchStatus::Failed, BatchCounts::default())
            })
            .unwrap();
        assert_eq!(queue.in_flight(), 1);

        let draining = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.shutdown().await })
        };
        release_tx.send(()).unwrap();
        draining.await.unwrap();

        assert_eq!(queue.in_flight(), 0);
        assert_eq!(handle.wait().await.unwrap().status, BatchStatus::Failed);
        assert!(
            queue
                .submit(Uuid::new_v4(), async move {
                    BatchOutcome::new(batch_id, BatchStatus::Completed, BatchCounts::default())
                })
                .is_err()
        );
    }
}
