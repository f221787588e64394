//! Storage traits and error types
//!
//! These are the only operations the scanner needs from a store. Every call is
//! synchronous; async callers run them on the blocking pool.

use crate::robots::RobotsEntry;
use crate::state::TaskPrint;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid index field: {0}")]
    InvalidField(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Store of scan result documents, partitioned into named collections
pub trait ResultStore: Send + Sync {
    // ===== Writes =====

    /// Writes a batch of results
    ///
    /// A result whose retry sub-document is marked `retried` updates the latest
    /// document with the same URL, replacing only its retry sub-document (and
    /// is inserted whole if no such document exists). Every other result is
    /// inserted as a new document.
    ///
    /// # Returns
    ///
    /// The number of results durably committed
    fn bulk_upsert(&self, collection: &str, results: &[TaskPrint]) -> StorageResult<usize>;

    /// Creates an index on a document field if it does not exist yet
    fn create_index_if_absent(&self, field: &str) -> StorageResult<()>;

    // ===== Reads =====

    /// Latest document whose `key` field equals `value`
    fn get_one(&self, collection: &str, key: &str, value: &str)
        -> StorageResult<Option<TaskPrint>>;

    /// Latest document for each of `urls` that exists; missing URLs are omitted
    fn bulk_read(&self, collection: &str, urls: &[String]) -> StorageResult<Vec<TaskPrint>>;

    /// Every document of a collection, oldest first
    fn all_results(&self, collection: &str) -> StorageResult<Vec<TaskPrint>>;
}

/// Persistent side of the robots.txt cache
pub trait RobotsStore: Send + Sync {
    /// Entries stored for each of `urls` that exists, expired ones included
    fn bulk_read_robots(&self, urls: &[String]) -> StorageResult<Vec<RobotsEntry>>;

    /// Inserts or replaces entries
    fn bulk_insert_robots(&self, entries: &[RobotsEntry]) -> StorageResult<usize>;

    fn delete_robots(&self, urls: &[String]) -> StorageResult<usize>;
}

/// Sink for URLs discovered in hostnames' sitemaps
pub trait SitemapStore: Send + Sync {
    fn insert_sitemap(
        &self,
        hostname: &str,
        sitemap_url: &str,
        locations: &[String],
    ) -> StorageResult<usize>;
}
