//! Read-through, write-behind robots.txt cache
//!
//! Lookups check an in-memory map first and fall through to the persistent
//! store via a coalescing [`BatchReader`]. Expired in-memory entries are
//! removed on access and never served. When the map grows past the configured
//! buffer size every entry is swept out and written to the store in one bulk
//! insert, so the map doubles as the write-behind buffer.

use crate::config::RobotsConfig;
use crate::robots::{RobotsFetcher, RobotsRules};
use crate::storage::{BatchReader, BulkSource, RobotsSource, RobotsStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;

/// Conceptual robots.txt URL used as the cache key
///
/// Ports are not part of the key; one rule set applies per scheme and host.
pub fn robots_key(scheme: &str, hostname: &str) -> String {
    format!("{}://{}/robots.txt", scheme, hostname)
}

/// Cached robots.txt for one `scheme://host`
#[derive(Debug, Clone, PartialEq)]
pub struct RobotsEntry {
    /// Normalized key, see [`robots_key`]
    pub url: String,
    /// Raw body; empty when the fetch failed or returned non-200
    pub body: String,
    pub expires_at: DateTime<Utc>,
}

impl RobotsEntry {
    pub fn new(url: String, body: String, expires_at: DateTime<Utc>) -> Self {
        Self {
            url,
            body,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn rules(&self) -> RobotsRules {
        RobotsRules::parse(&self.body)
    }

    pub fn allows(&self, url: &str, agent: &str) -> bool {
        self.rules().allows(url, agent)
    }
}

/// Shared robots.txt cache
pub struct RobotsCache {
    entries: Mutex<HashMap<String, RobotsEntry>>,
    store: Arc<dyn RobotsStore>,
    reader: BatchReader<RobotsEntry>,
    buffer_size: usize,
}

impl RobotsCache {
    /// Creates the cache and starts its store reader
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(store: Arc<dyn RobotsStore>, config: &RobotsConfig) -> (Self, JoinHandle<()>) {
        let source: Arc<dyn BulkSource<RobotsEntry>> =
            Arc::new(RobotsSource::new(Arc::clone(&store)));
        let (reader, handle) = BatchReader::spawn(source, config.batch_interval());

        let cache = Self {
            entries: Mutex::new(HashMap::new()),
            store,
            reader,
            buffer_size: config.buffer_size,
        };
        (cache, handle)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, RobotsEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of entries currently held in memory
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the rules for `scheme://hostname`
    ///
    /// # Returns
    ///
    /// * `Some(RobotsEntry)` - A live entry from memory or the store
    /// * `None` - Not cached, or the in-memory entry had expired
    pub async fn get(&self, scheme: &str, hostname: &str) -> Option<RobotsEntry> {
        let key = robots_key(scheme, hostname);
        {
            let mut entries = self.entries();
            if let Some(entry) = entries.get(&key) {
                if !entry.is_expired(Utc::now()) {
                    return Some(entry.clone());
                }
                tracing::debug!("Evicting expired robots entry {}", key);
                entries.remove(&key);
                return None;
            }
        }
        self.reader.get(&key).await
    }

    /// Inserts or overwrites an entry, sweeping the map into the store if it is over capacity
    pub async fn add(&self, entry: RobotsEntry) {
        let swept: Vec<RobotsEntry> = {
            let mut entries = self.entries();
            entries.insert(entry.url.clone(), entry);
            if entries.len() > self.buffer_size {
                entries.drain().map(|(_, e)| e).collect()
            } else {
                Vec::new()
            }
        };

        if !swept.is_empty() {
            self.write_behind(swept).await;
        }
    }

    /// Cached rules for `scheme://hostname`, fetching them on a miss
    pub async fn get_or_fetch(
        &self,
        fetcher: &RobotsFetcher,
        scheme: &str,
        hostname: &str,
        port: Option<u16>,
    ) -> RobotsEntry {
        if let Some(entry) = self.get(scheme, hostname).await {
            return entry;
        }
        let entry = fetcher.fetch(scheme, hostname, port).await;
        self.add(entry.clone()).await;
        entry
    }

    /// Writes every in-memory entry to the store
    pub async fn flush_all(&self) {
        let swept: Vec<RobotsEntry> = self.entries().drain().map(|(_, e)| e).collect();
        if !swept.is_empty() {
            self.write_behind(swept).await;
        }
    }

    async fn write_behind(&self, entries: Vec<RobotsEntry>) {
        let store = Arc::clone(&self.store);
        let count = entries.len();
        match tokio::task::spawn_blocking(move || store.bulk_insert_robots(&entries)).await {
            Ok(Ok(written)) => tracing::debug!("Flushed {} robots entries", written),
            Ok(Err(e)) => tracing::warn!("Failed to flush {} robots entries: {}", count, e),
            Err(e) => tracing::warn!("Robots flush task failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageResult;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory robots store that counts calls
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, RobotsEntry>>,
        reads: AtomicUsize,
        inserts: Mutex<Vec<usize>>,
    }

    impl RobotsStore for MemoryStore {
        fn bulk_read_robots(&self, urls: &[String]) -> StorageResult<Vec<RobotsEntry>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let rows = self.rows.lock().unwrap();
            Ok(urls.iter().filter_map(|u| rows.get(u).cloned()).collect())
        }

        fn bulk_insert_robots(&self, entries: &[RobotsEntry]) -> StorageResult<usize> {
            self.inserts.lock().unwrap().push(entries.len());
            let mut rows = self.rows.lock().unwrap();
            for entry in entries {
                rows.insert(entry.url.clone(), entry.clone());
            }
            Ok(entries.len())
        }

        fn delete_robots(&self, urls: &[String]) -> StorageResult<usize> {
            let mut rows = self.rows.lock().unwrap();
            Ok(urls.iter().filter(|u| rows.remove(*u).is_some()).count())
        }
    }

    fn config(buffer_size: usize) -> RobotsConfig {
        RobotsConfig {
            buffer_size,
            batch_interval_ms: 10,
        }
    }

    fn entry(scheme: &str, host: &str, ttl: Duration) -> RobotsEntry {
        RobotsEntry::new(
            robots_key(scheme, host),
            "User-agent: *\nDisallow: /private".to_string(),
            Utc::now() + ttl,
        )
    }

    #[test]
    fn test_robots_key() {
        assert_eq!(
            robots_key("https", "example.com"),
            "https://example.com/robots.txt"
        );
    }

    #[tokio::test]
    async fn test_repeated_gets_do_not_hit_store() {
        let store = Arc::new(MemoryStore::default());
        let (cache, _handle) = RobotsCache::new(store.clone(), &config(3));

        assert!(cache.get("https", "a.example.com").await.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);

        cache.add(entry("https", "a.example.com", Duration::hours(1))).await;
        for _ in 0..5 {
            assert!(cache.get("https", "a.example.com").await.is_some());
        }
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_evicted_not_served() {
        let store = Arc::new(MemoryStore::default());
        let (cache, _handle) = RobotsCache::new(store.clone(), &config(3));

        cache.add(entry("https", "a.example.com", Duration::seconds(-1))).await;
        assert_eq!(cache.len(), 1);
        assert!(cache.get("https", "a.example.com").await.is_none());
        assert_eq!(cache.len(), 0);
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_overflow_sweeps_everything_to_store() {
        let store = Arc::new(MemoryStore::default());
        let (cache, _handle) = RobotsCache::new(store.clone(), &config(2));

        cache.add(entry("http", "a.example.com", Duration::hours(1))).await;
        cache.add(entry("https", "a.example.com", Duration::hours(1))).await;
        assert!(store.inserts.lock().unwrap().is_empty());

        cache.add(entry("http", "b.example.com", Duration::hours(1))).await;
        assert_eq!(*store.inserts.lock().unwrap(), vec![3]);
        assert!(cache.is_empty());

        // Now served from the store through the batch reader
        let found = cache.get("https", "a.example.com").await.unwrap();
        assert!(!found.allows("https://a.example.com/private", "PoliteScan"));
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_store_entries_are_deleted() {
        let store = Arc::new(MemoryStore::default());
        store
            .bulk_insert_robots(&[entry("https", "old.example.com", Duration::seconds(-5))])
            .unwrap();
        let (cache, _handle) = RobotsCache::new(store.clone(), &config(3));

        assert!(cache.get("https", "old.example.com").await.is_none());
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flush_all_drains_memory() {
        let store = Arc::new(MemoryStore::default());
        let (cache, _handle) = RobotsCache::new(store.clone(), &config(10));

        cache.add(entry("https", "a.example.com", Duration::hours(1))).await;
        cache.flush_all().await;
        assert!(cache.is_empty());
        assert_eq!(store.rows.lock().unwrap().len(), 1);
    }
}
