//! Database schema definitions
//!
//! Result documents are stored as JSON text so that the retry sub-document can
//! be replaced in place with `json_set` and fields can be indexed with
//! `json_extract` expressions.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Result documents, one row per dispatched task (retries update in place)
CREATE TABLE IF NOT EXISTS scan_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    url TEXT NOT NULL,
    doc TEXT NOT NULL,
    inserted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scan_results_collection_url ON scan_results(collection, url);

-- robots.txt bodies flushed from the in-memory cache
CREATE TABLE IF NOT EXISTS robots (
    url TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- URLs listed in hostnames' sitemap.xml
CREATE TABLE IF NOT EXISTS sitemap_urls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL,
    sitemap_url TEXT NOT NULL,
    loc TEXT NOT NULL,
    discovered_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sitemap_urls_hostname ON sitemap_urls(hostname);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
