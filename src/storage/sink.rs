//! Write-behind result sink
//!
//! Results are queued on a channel and written with one `bulk_upsert` per
//! flush interval. A batch that fails to commit stays buffered and is retried
//! on the next tick, so delivery is at-least-once. Each committed result marks
//! one task complete on the [`CompletionTracker`].

use crate::scanner::CompletionTracker;
use crate::state::TaskPrint;
use crate::storage::ResultStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the result queue
const RESULT_QUEUE_CAPACITY: usize = 50_000;

/// Handle for submitting finished results
#[derive(Clone)]
pub struct ResultSink {
    results: mpsc::Sender<TaskPrint>,
}

impl ResultSink {
    /// Starts the flush loop writing into `collection`
    ///
    /// The loop exits after every `ResultSink` clone is dropped and the buffer
    /// has been committed.
    pub fn spawn(
        store: Arc<dyn ResultStore>,
        collection: String,
        flush_every: Duration,
        tracker: CompletionTracker,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(RESULT_QUEUE_CAPACITY);
        let handle = tokio::spawn(flush_loop(store, collection, flush_every, tracker, rx));
        (Self { results: tx }, handle)
    }

    /// Queues one result for the next flush
    pub async fn submit(&self, result: TaskPrint) {
        let url = result.url.clone();
        if self.results.send(result).await.is_err() {
            tracing::error!("Result sink stopped; dropping result for {}", url);
        }
    }
}

async fn flush_loop(
    store: Arc<dyn ResultStore>,
    collection: String,
    flush_every: Duration,
    tracker: CompletionTracker,
    mut results: mpsc::Receiver<TaskPrint>,
) {
    let mut interval = tokio::time::interval(flush_every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut buffer: Vec<TaskPrint> = Vec::new();
    let mut closed = false;

    loop {
        interval.tick().await;

        loop {
            match results.try_recv() {
                Ok(result) => buffer.push(result),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if !buffer.is_empty() {
            buffer = flush(&store, &collection, &tracker, buffer).await;
        }

        if closed && buffer.is_empty() {
            break;
        }
    }
}

/// Writes `batch`, returning whatever must stay buffered
async fn flush(
    store: &Arc<dyn ResultStore>,
    collection: &str,
    tracker: &CompletionTracker,
    batch: Vec<TaskPrint>,
) -> Vec<TaskPrint> {
    let store = Arc::clone(store);
    let collection = collection.to_string();
    let count = batch.len();

    let outcome = tokio::task::spawn_blocking(move || {
        let written = store.bulk_upsert(&collection, &batch);
        (batch, written)
    })
    .await;

    match outcome {
        Ok((_, Ok(committed))) => {
            tracing::debug!("Flushed {} results", committed);
            tracker.done(committed);
            Vec::new()
        }
        Ok((batch, Err(e))) => {
            tracing::warn!("Flush of {} results failed, keeping them buffered: {}", batch.len(), e);
            batch
        }
        Err(e) => {
            tracing::error!("Flush task failed, {} results lost: {}", count, e);
            tracker.done(count);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteStorage, StorageError, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn result(url: &str) -> TaskPrint {
        TaskPrint {
            url: url.to_string(),
            ..TaskPrint::default()
        }
    }

    #[tokio::test]
    async fn test_results_are_flushed_and_counted() {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let tracker = CompletionTracker::new();
        tracker.add(3);

        let (sink, handle) = ResultSink::spawn(
            storage.clone(),
            "T".to_string(),
            Duration::from_millis(20),
            tracker.clone(),
        );
        for i in 0..3 {
            sink.submit(result(&format!("https://example.com/{}", i)))
                .await;
        }

        tokio::time::timeout(Duration::from_secs(5), tracker.wait_idle())
            .await
            .unwrap();
        drop(sink);
        handle.await.unwrap();

        assert_eq!(storage.all_results("T").unwrap().len(), 3);
    }

    /// Fails the first write, then delegates
    struct FlakyStore {
        inner: SqliteStorage,
        failures: AtomicUsize,
    }

    impl ResultStore for FlakyStore {
        fn bulk_upsert(&self, collection: &str, results: &[TaskPrint]) -> StorageResult<usize> {
            if self.failures.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StorageError::Database("unavailable".to_string()));
            }
            self.inner.bulk_upsert(collection, results)
        }
        fn create_index_if_absent(&self, field: &str) -> StorageResult<()> {
            self.inner.create_index_if_absent(field)
        }
        fn get_one(&self, c: &str, k: &str, v: &str) -> StorageResult<Option<TaskPrint>> {
            self.inner.get_one(c, k, v)
        }
        fn bulk_read(&self, c: &str, urls: &[String]) -> StorageResult<Vec<TaskPrint>> {
            self.inner.bulk_read(c, urls)
        }
        fn all_results(&self, c: &str) -> StorageResult<Vec<TaskPrint>> {
            self.inner.all_results(c)
        }
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried() {
        let store = Arc::new(FlakyStore {
            inner: SqliteStorage::new_in_memory().unwrap(),
            failures: AtomicUsize::new(0),
        });
        let tracker = CompletionTracker::new();
        tracker.add(1);

        let (sink, handle) = ResultSink::spawn(
            store.clone(),
            "T".to_string(),
            Duration::from_millis(20),
            tracker.clone(),
        );
        sink.submit(result("https://example.com/")).await;

        tokio::time::timeout(Duration::from_secs(5), tracker.wait_idle())
            .await
            .unwrap();
        drop(sink);
        handle.await.unwrap();

        assert!(store.failures.load(Ordering::SeqCst) >= 2);
        assert_eq!(store.inner.all_results("T").unwrap().len(), 1);
    }
}
