//! Coalescing batch reader
//!
//! Lookups are queued to a single background loop. On every tick the loop
//! drains the queue, merges waiters asking for the same key, issues one bulk
//! read for the distinct keys and fans each answer (or `None`) out to every
//! waiter. Store read rate is therefore bounded by the tick, not by how many
//! fetches are in flight.

use crate::robots::RobotsEntry;
use crate::state::TaskPrint;
use crate::storage::{ResultStore, RobotsStore, StorageResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Capacity of the lookup queue
const REQUEST_QUEUE_CAPACITY: usize = 50_000;

/// A document identified by a single key field
pub trait Document: Clone + Send + 'static {
    fn key(&self) -> &str;
}

impl Document for TaskPrint {
    fn key(&self) -> &str {
        &self.url
    }
}

impl Document for RobotsEntry {
    fn key(&self) -> &str {
        &self.url
    }
}

/// Bulk lookup by key for one document kind
pub trait BulkSource<D>: Send + Sync + 'static {
    /// Documents for the keys that exist; absent keys are simply omitted
    fn bulk_read(&self, keys: &[String]) -> StorageResult<Vec<D>>;
}

/// Results of one collection, looked up by URL
pub struct CollectionSource {
    store: Arc<dyn ResultStore>,
    collection: String,
}

impl CollectionSource {
    pub fn new(store: Arc<dyn ResultStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

impl BulkSource<TaskPrint> for CollectionSource {
    fn bulk_read(&self, keys: &[String]) -> StorageResult<Vec<TaskPrint>> {
        self.store.bulk_read(&self.collection, keys)
    }
}

/// Stored robots entries; expired ones are deleted on read and never returned
pub struct RobotsSource {
    store: Arc<dyn RobotsStore>,
}

impl RobotsSource {
    pub fn new(store: Arc<dyn RobotsStore>) -> Self {
        Self { store }
    }
}

impl BulkSource<RobotsEntry> for RobotsSource {
    fn bulk_read(&self, keys: &[String]) -> StorageResult<Vec<RobotsEntry>> {
        let now = chrono::Utc::now();
        let (fresh, expired): (Vec<RobotsEntry>, Vec<RobotsEntry>) = self
            .store
            .bulk_read_robots(keys)?
            .into_iter()
            .partition(|entry| !entry.is_expired(now));

        if !expired.is_empty() {
            let urls: Vec<String> = expired.into_iter().map(|e| e.url).collect();
            self.store.delete_robots(&urls)?;
        }
        Ok(fresh)
    }
}

struct ReadRequest<D> {
    key: String,
    reply: oneshot::Sender<Option<D>>,
}

/// Handle used to queue lookups
pub struct BatchReader<D> {
    requests: mpsc::Sender<ReadRequest<D>>,
}

impl<D> Clone for BatchReader<D> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
        }
    }
}

impl<D: Document> BatchReader<D> {
    /// Starts the batch loop
    ///
    /// The loop exits once every `BatchReader` clone has been dropped and the
    /// remaining requests are answered.
    pub fn spawn(source: Arc<dyn BulkSource<D>>, tick: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let handle = tokio::spawn(run_batches(source, rx, tick));
        (Self { requests: tx }, handle)
    }

    /// Looks up one key, waiting for the next batch
    ///
    /// Returns `None` if the key is absent or the batch loop has stopped.
    pub async fn get(&self, key: &str) -> Option<D> {
        let (reply, answer) = oneshot::channel();
        let request = ReadRequest {
            key: key.to_string(),
            reply,
        };
        if self.requests.send(request).await.is_err() {
            tracing::warn!("Batch reader stopped; treating {} as not found", key);
            return None;
        }
        answer.await.ok().flatten()
    }
}

async fn run_batches<D: Document>(
    source: Arc<dyn BulkSource<D>>,
    mut requests: mpsc::Receiver<ReadRequest<D>>,
    tick: Duration,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let mut waiters: HashMap<String, Vec<oneshot::Sender<Option<D>>>> = HashMap::new();
        let mut closed = false;
        loop {
            match requests.try_recv() {
                Ok(request) => waiters.entry(request.key).or_default().push(request.reply),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if !waiters.is_empty() {
            answer_batch(&source, waiters).await;
        }

        if closed {
            break;
        }
    }
}

async fn answer_batch<D: Document>(
    source: &Arc<dyn BulkSource<D>>,
    waiters: HashMap<String, Vec<oneshot::Sender<Option<D>>>>,
) {
    let keys: Vec<String> = waiters.keys().cloned().collect();
    let reader = Arc::clone(source);
    let count = keys.len();

    let found = match tokio::task::spawn_blocking(move || reader.bulk_read(&keys)).await {
        Ok(Ok(docs)) => docs,
        Ok(Err(e)) => {
            tracing::warn!("Bulk read of {} keys failed: {}", count, e);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Bulk read task failed: {}", e);
            Vec::new()
        }
    };
    tracing::trace!("Bulk read {} keys, {} found", count, found.len());

    let mut by_key: HashMap<String, D> = found
        .into_iter()
        .map(|doc| (doc.key().to_string(), doc))
        .collect();

    for (key, replies) in waiters {
        let doc = by_key.remove(&key);
        for reply in replies {
            let _ = reply.send(doc.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Doc {
        key: String,
    }

    impl Document for Doc {
        fn key(&self) -> &str {
            &self.key
        }
    }

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl BulkSource<Doc> for CountingSource {
        fn bulk_read(&self, keys: &[String]) -> StorageResult<Vec<Doc>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(keys.to_vec());
            Ok(keys
                .iter()
                .filter(|k| k.starts_with("hit"))
                .map(|k| Doc { key: k.clone() })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_are_coalesced() {
        let source = Arc::new(CountingSource::default());
        let (reader, _handle) = BatchReader::spawn(
            source.clone() as Arc<dyn BulkSource<Doc>>,
            Duration::from_millis(200),
        );

        let lookups = ["hit-1", "hit-1", "hit-2", "miss-1", "hit-1"];
        let handles: Vec<_> = lookups
            .iter()
            .map(|key| {
                let reader = reader.clone();
                let key = key.to_string();
                tokio::spawn(async move { reader.get(&key).await })
            })
            .collect();

        let mut answers = Vec::new();
        for handle in handles {
            answers.push(handle.await.unwrap());
        }

        assert_eq!(answers[0], Some(Doc { key: "hit-1".into() }));
        assert_eq!(answers[1], Some(Doc { key: "hit-1".into() }));
        assert_eq!(answers[3], None);

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let seen = source.seen.lock().unwrap();
        let mut keys = seen[0].clone();
        keys.sort();
        assert_eq!(keys, vec!["hit-1", "hit-2", "miss-1"]);
    }

    #[tokio::test]
    async fn test_loop_exits_when_handles_dropped() {
        let source = Arc::new(CountingSource::default());
        let (reader, handle) = BatchReader::spawn(
            source as Arc<dyn BulkSource<Doc>>,
            Duration::from_millis(10),
        );
        drop(reader);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
