//! SQLite storage implementation
//!
//! This module provides a SQLite-backed implementation of the result, robots
//! and sitemap stores. The connection is guarded by a mutex so one instance can
//! be shared between the sink, the batch readers and the sitemap fetches.

use crate::robots::RobotsEntry;
use crate::state::TaskPrint;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{
    ResultStore, RobotsStore, SitemapStore, StorageError, StorageResult,
};
use crate::ScanError;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Upper bound on bound parameters per `IN (...)` query
const MAX_IN_PARAMS: usize = 500;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Database opened and schema initialized
    /// * `Err(ScanError::StoreUnavailable)` - The database could not be opened
    pub fn new(path: &Path) -> Result<Self, ScanError> {
        Self::open(path).map_err(|e| ScanError::StoreUnavailable {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory().map_err(|e| ScanError::StoreUnavailable {
            path: ":memory:".to_string(),
            message: e.to_string(),
        })?;
        initialize_schema(&conn).map_err(StorageError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
    }
}

/// Turns a dotted document field into a JSON path, rejecting anything else
fn json_path(field: &str) -> StorageResult<String> {
    let valid = !field.is_empty()
        && !field.starts_with('.')
        && !field.ends_with('.')
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');

    if valid {
        Ok(format!("$.{}", field))
    } else {
        Err(StorageError::InvalidField(field.to_string()))
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn parse_expiry(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        // Unreadable expiry counts as already expired
        .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

impl ResultStore for SqliteStorage {
    // ===== Writes =====

    fn bulk_upsert(&self, collection: &str, results: &[TaskPrint]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO scan_results (collection, url, doc, inserted_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut merge_retry = tx.prepare_cached(
                "UPDATE scan_results SET doc = json_set(doc, '$.retry', json(?1))
                 WHERE id = (
                     SELECT id FROM scan_results
                     WHERE collection = ?2 AND url = ?3 AND json_extract(doc, '$.source') = ?4
                     ORDER BY id DESC LIMIT 1
                 )",
            )?;

            for result in results {
                if result.retry.retried {
                    let retry_doc = serde_json::to_string(&result.retry)?;
                    let merged = merge_retry.execute(params![
                        retry_doc,
                        collection,
                        result.url,
                        result.source
                    ])?;
                    if merged > 0 {
                        continue;
                    }
                    tracing::debug!("No original document for retried {}, inserting", result.url);
                }
                insert.execute(params![collection, result.url, result.to_json()?, now])?;
            }
        }

        tx.commit()?;
        Ok(results.len())
    }

    fn create_index_if_absent(&self, field: &str) -> StorageResult<()> {
        let path = json_path(field)?;
        let name = format!("idx_scan_results_doc_{}", field.replace('.', "_"));
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON scan_results(collection, json_extract(doc, '{}'));",
            name, path
        ))?;
        Ok(())
    }

    // ===== Reads =====

    fn get_one(
        &self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> StorageResult<Option<TaskPrint>> {
        let path = json_path(key)?;
        let conn = self.conn()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM scan_results
                 WHERE collection = ?1 AND json_extract(doc, ?2) = ?3
                 ORDER BY id DESC LIMIT 1",
                params![collection, path, value],
                |row| row.get(0),
            )
            .optional()?;

        Ok(doc.map(|d| TaskPrint::from_json(&d)).transpose()?)
    }

    fn bulk_read(&self, collection: &str, urls: &[String]) -> StorageResult<Vec<TaskPrint>> {
        let conn = self.conn()?;
        let mut latest: HashMap<String, TaskPrint> = HashMap::new();

        for chunk in urls.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT url, doc FROM scan_results WHERE collection = ? AND url IN ({}) ORDER BY id",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let args = std::iter::once(collection).chain(chunk.iter().map(String::as_str));
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            for row in rows {
                let (url, doc) = row?;
                latest.insert(url, TaskPrint::from_json(&doc)?);
            }
        }

        Ok(latest.into_values().collect())
    }

    fn all_results(&self, collection: &str) -> StorageResult<Vec<TaskPrint>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT doc FROM scan_results WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(TaskPrint::from_json(&row?)?);
        }
        Ok(results)
    }
}

impl RobotsStore for SqliteStorage {
    fn bulk_read_robots(&self, urls: &[String]) -> StorageResult<Vec<RobotsEntry>> {
        let conn = self.conn()?;
        let mut entries = Vec::new();

        for chunk in urls.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "SELECT url, body, expires_at FROM robots WHERE url IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            for row in rows {
                let (url, body, expires_at) = row?;
                entries.push(RobotsEntry::new(url, body, parse_expiry(&expires_at)));
            }
        }

        Ok(entries)
    }

    fn bulk_insert_robots(&self, entries: &[RobotsEntry]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO robots (url, body, expires_at) VALUES (?1, ?2, ?3)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.url,
                    entry.body,
                    entry.expires_at.to_rfc3339()
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn delete_robots(&self, urls: &[String]) -> StorageResult<usize> {
        let conn = self.conn()?;
        let mut deleted = 0;
        for chunk in urls.chunks(MAX_IN_PARAMS) {
            let sql = format!(
                "DELETE FROM robots WHERE url IN ({})",
                placeholders(chunk.len())
            );
            deleted += conn.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(deleted)
    }
}

impl SitemapStore for SqliteStorage {
    fn insert_sitemap(
        &self,
        hostname: &str,
        sitemap_url: &str,
        locations: &[String],
    ) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO sitemap_urls (hostname, sitemap_url, loc, discovered_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for loc in locations {
                stmt.execute(params![hostname, sitemap_url, loc, now])?;
            }
        }
        tx.commit()?;
        Ok(locations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ResponseSummary, RetryAttempt};
    use chrono::Duration;

    fn result(url: &str, source: &str, status: i32) -> TaskPrint {
        let mut print = TaskPrint {
            url: url.to_string(),
            source: source.to_string(),
            hostname: "example.com".to_string(),
            ..TaskPrint::default()
        };
        print.attempt.resp = ResponseSummary {
            status_code: status,
            ..ResponseSummary::default()
        };
        print
    }

    fn retried(mut print: TaskPrint, status: i32) -> TaskPrint {
        print.needs_retry = true;
        print.retry = RetryAttempt {
            retried: true,
            ..RetryAttempt::default()
        };
        print.retry.attempt.resp.status_code = status;
        print
    }

    #[test]
    fn test_bulk_upsert_inserts() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let committed = storage
            .bulk_upsert(
                "T",
                &[
                    result("https://example.com/1", "", 200),
                    result("https://example.com/2", "", 404),
                ],
            )
            .unwrap();
        assert_eq!(committed, 2);
        assert_eq!(storage.all_results("T").unwrap().len(), 2);
        assert!(storage.all_results("other").unwrap().is_empty());
    }

    #[test]
    fn test_retry_merges_into_original() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let original = result("https://example.com/1", "feed", 500);
        storage.bulk_upsert("T", &[original.clone()]).unwrap();
        storage
            .bulk_upsert("T", &[retried(original, 200)])
            .unwrap();

        let all = storage.all_results("T").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].attempt.resp.status_code, 500);
        assert!(all[0].retry.retried);
        assert_eq!(all[0].retry.attempt.resp.status_code, 200);
    }

    #[test]
    fn test_retry_without_original_is_inserted() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .bulk_upsert("T", &[retried(result("https://example.com/9", "", 0), 200)])
            .unwrap();

        let all = storage.all_results("T").unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].retry.retried);
    }

    #[test]
    fn test_get_one_by_field() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .bulk_upsert(
                "T",
                &[
                    result("https://example.com/1", "a", 200),
                    result("https://example.com/2", "b", 301),
                ],
            )
            .unwrap();

        let found = storage.get_one("T", "source", "b").unwrap().unwrap();
        assert_eq!(found.url, "https://example.com/2");
        assert!(storage.get_one("T", "source", "zzz").unwrap().is_none());
        assert!(storage.get_one("T", "bad field;", "x").is_err());
    }

    #[test]
    fn test_bulk_read_returns_latest_per_url() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage
            .bulk_upsert("A", &[result("https://example.com/1", "", 500)])
            .unwrap();
        storage
            .bulk_upsert("A", &[result("https://example.com/1", "", 200)])
            .unwrap();

        let found = storage
            .bulk_read(
                "A",
                &[
                    "https://example.com/1".to_string(),
                    "https://example.com/missing".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].attempt.resp.status_code, 200);
    }

    #[test]
    fn test_create_index_is_idempotent() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage.create_index_if_absent("url").unwrap();
        storage.create_index_if_absent("url").unwrap();
        storage.create_index_if_absent("resp.status_code").unwrap();
        assert!(matches!(
            storage.create_index_if_absent("url); DROP TABLE robots; --"),
            Err(StorageError::InvalidField(_))
        ));
    }

    #[test]
    fn test_robots_round_trip_and_delete() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let expires = Utc::now() + Duration::hours(1);
        let entries = vec![
            RobotsEntry::new(
                "https://a.example.com/robots.txt".to_string(),
                "User-agent: *\nDisallow: /".to_string(),
                expires,
            ),
            RobotsEntry::new(
                "http://a.example.com/robots.txt".to_string(),
                String::new(),
                expires,
            ),
        ];
        assert_eq!(storage.bulk_insert_robots(&entries).unwrap(), 2);

        let urls: Vec<String> = entries.iter().map(|e| e.url.clone()).collect();
        let found = storage.bulk_read_robots(&urls).unwrap();
        assert_eq!(found.len(), 2);

        assert_eq!(storage.delete_robots(&urls[..1]).unwrap(), 1);
        assert_eq!(storage.bulk_read_robots(&urls).unwrap().len(), 1);
    }

    #[test]
    fn test_insert_sitemap() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let count = storage
            .insert_sitemap(
                "example.com",
                "https://example.com/sitemap.xml",
                &[
                    "https://example.com/a".to_string(),
                    "https://example.com/b".to_string(),
                ],
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
