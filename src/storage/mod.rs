//! Storage module for persisting scan data
//!
//! This module handles every interaction with the persistent store:
//! - SQLite schema management and the store implementation
//! - Result documents (insert, retry merge, lookups, field indexes)
//! - The persistent side of the robots.txt cache
//! - Sitemap URLs discovered during host warm-up
//! - Coalescing batch reads and the write-behind result sink

mod batch;
mod schema;
mod sink;
mod sqlite;
mod traits;

pub use batch::{BatchReader, BulkSource, CollectionSource, Document, RobotsSource};
pub use sink::ResultSink;
pub use sqlite::SqliteStorage;
pub use traits::{ResultStore, RobotsStore, SitemapStore, StorageError, StorageResult};

use crate::ScanError;
use std::path::Path;

/// Opens the scan database, creating it if needed
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Store ready for use
/// * `Err(ScanError::StoreUnavailable)` - The database could not be opened
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ScanError> {
    SqliteStorage::new(path)
}
