//! Integration tests for the scanner
//!
//! These tests use wiremock servers reached through `[dns] static-hosts`
//! overrides, so synthetic hostnames resolve to the loopback mock and every
//! scan runs end-to-end without touching the network.

use polite_scan::config::{
    Config, DatabaseConfig, DnsConfig, RetryConfig, RobotsConfig, ScanConfig, UserAgentConfig,
};
use polite_scan::storage::{ResultStore, RobotsStore, SqliteStorage};
use polite_scan::{Coordinator, ScanError, TaskPrint};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOSTS: [&str; 3] = ["alpha.test", "beta.test", "gamma.test"];

/// Scratch directory holding the input, excluded list and database
struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn db_path(&self) -> String {
        self.path("scan.db").display().to_string()
    }

    fn write_lines(&self, name: &str, lines: &[String]) -> PathBuf {
        let file = self.path(name);
        std::fs::write(&file, lines.join("\n")).unwrap();
        file
    }

    /// Config scanning `tasks` into `collection` within `runtime_ms`
    fn config(
        &self,
        tasks: &[String],
        excluded: &[&str],
        collection: &str,
        runtime_ms: u64,
    ) -> Config {
        let input_file = self.write_lines(&format!("{}-tasks.txt", collection), tasks);
        let excluded: Vec<String> = excluded.iter().map(|h| h.to_string()).collect();
        let excluded_file = self.write_lines(&format!("{}-excluded.txt", collection), &excluded);

        let static_hosts: HashMap<String, String> = HOSTS
            .iter()
            .map(|host| (host.to_string(), "127.0.0.1".to_string()))
            .collect();

        Config {
            scan: ScanConfig {
                input_file,
                excluded_file,
                excluded_reload_interval: 600,
                expected_runtime_ms: runtime_ms,
                timeout_ms: 2_000,
                worker_stress: 100,
                retries: 1,
                sentinel_politeness: 3,
                health_check_scheme: "http".to_string(),
                hash_buffer_len: 4_096,
                tls_handshake_limit: None,
                get_request_limit: None,
            },
            robots: RobotsConfig {
                buffer_size: 3,
                batch_interval_ms: 20,
            },
            retry: RetryConfig { politeness_ms: 200 },
            database: DatabaseConfig {
                path: self.db_path(),
                collection: collection.to_string(),
                comparison_collection: None,
                write_frequency_ms: 100,
                read_batch_interval_ms: 20,
            },
            dns: DnsConfig {
                servers: vec!["127.0.0.1".to_string()],
                timeout_ms: 300,
                static_hosts,
            },
            user_agent: UserAgentConfig {
                crawler_name: "PoliteScan".to_string(),
                crawler_version: "1.0.0".to_string(),
                contact_url: "https://example.com/contact".to_string(),
                contact_email: "test@example.com".to_string(),
            },
        }
    }

    fn results(&self, collection: &str) -> Vec<TaskPrint> {
        let storage = SqliteStorage::new(Path::new(&self.db_path())).unwrap();
        storage.all_results(collection).unwrap()
    }
}

/// Mock serving an allow-all robots.txt and 200 for everything else
async fn start_server(robots: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(robots))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/.*$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .insert_header("ETag", "\"v1\""),
        )
        .mount(&server)
        .await;
    server
}

fn task_urls(server: &MockServer, host: &str, prefix: &str, n: usize) -> Vec<String> {
    let port = server.address().port();
    (0..n)
        .map(|i| format!("http://{}:{}/{}{}", host, port, prefix, i))
        .collect()
}

#[tokio::test]
async fn test_scan_persists_every_task_once() {
    let server = start_server("User-agent: *\nAllow: /").await;
    let fixture = Fixture::new();

    let mut tasks = Vec::new();
    tasks.extend(task_urls(&server, "alpha.test", "a", 3));
    tasks.extend(task_urls(&server, "beta.test", "b", 2));
    tasks.extend(task_urls(&server, "gamma.test", "g", 2));
    // Duplicate task and an excluded hostname
    tasks.push(tasks[0].clone());
    tasks.push(format!("http://delta.test:{}/d0", server.address().port()));

    let config = fixture.config(&tasks, &["delta.test"], "A", 2_000);
    let summary = Coordinator::new(config).unwrap().run().await.unwrap();

    assert_eq!(summary.tasks, 7);
    assert_eq!(summary.hosts, 3);
    assert_eq!(summary.excluded, 1);
    assert_eq!(summary.retried, 0);

    let results = fixture.results("A");
    assert_eq!(results.len(), 7);
    let urls: HashSet<&str> = results.iter().map(|r| r.url.as_str()).collect();
    assert_eq!(urls.len(), 7);
    for result in &results {
        assert_eq!(result.attempt.resp.status_code, 200, "{}", result.url);
        assert_eq!(result.attempt.err, "");
        assert_eq!(result.attempt.resp.etag, "v1");
        assert!(!result.retry.retried);
        assert!(!result.dns_records.is_empty());
    }
}

#[tokio::test]
async fn test_unresolvable_hostname_is_a_dns_error() {
    let fixture = Fixture::new();
    let tasks: Vec<String> = (0..3)
        .map(|i| format!("http://nonexistent.invalid/page{}", i))
        .collect();

    let config = fixture.config(&tasks, &[], "A", 1_000);
    let summary = Coordinator::new(config).unwrap().run().await.unwrap();
    assert_eq!(summary.retried, 0);

    let results = fixture.results("A");
    assert_eq!(results.len(), 3);
    for result in &results {
        assert!(result.attempt.err.starts_with("DNS"), "{}", result.attempt.err);
        assert_eq!(result.attempt.resp.status_code, 0);
        assert!(!result.retry.retried);
    }
}

#[tokio::test]
async fn test_changed_results_are_retried() {
    let server = start_server("User-agent: *\nAllow: /").await;
    let fixture = Fixture::new();

    let mut tasks = task_urls(&server, "alpha.test", "a", 8);
    tasks.extend(task_urls(&server, "beta.test", "b", 8));

    let first = fixture.config(&tasks, &[], "A", 2_000);
    Coordinator::new(first).unwrap().run().await.unwrap();
    assert_eq!(fixture.results("A").len(), 16);

    // Corrupt every other stored status code
    {
        let conn = rusqlite::Connection::open(fixture.db_path()).unwrap();
        let changed = conn
            .execute(
                "UPDATE scan_results SET doc = json_set(doc, '$.resp.status_code', -1)
                 WHERE collection = 'A' AND id % 2 = 0",
                [],
            )
            .unwrap();
        assert_eq!(changed, 8);
    }

    let mut second = fixture.config(&tasks, &[], "B", 2_000);
    second.database.comparison_collection = Some("A".to_string());
    let summary = Coordinator::new(second).unwrap().run().await.unwrap();
    assert_eq!(summary.retried, 8);

    let results = fixture.results("B");
    assert_eq!(results.len(), 16);
    let retried: Vec<&TaskPrint> = results.iter().filter(|r| r.retry.retried).collect();
    assert_eq!(retried.len(), 8);
    for result in retried {
        assert!(result.needs_retry);
        assert_eq!(result.retry.attempt.resp.status_code, 200);
    }
}

#[tokio::test]
async fn test_robots_disallowed_tasks_are_reported() {
    let server = start_server("User-agent: *\nDisallow: /private").await;
    let fixture = Fixture::new();

    let mut tasks = task_urls(&server, "alpha.test", "private/", 5);
    tasks.extend(task_urls(&server, "beta.test", "private/", 5));

    let mut config = fixture.config(&tasks, &[], "A", 1_000);
    config.robots.buffer_size = 2;
    Coordinator::new(config).unwrap().run().await.unwrap();

    let results = fixture.results("A");
    assert_eq!(results.len(), 10);
    for result in &results {
        assert!(result.attempt.err.starts_with("path"), "{}", result.attempt.err);
        assert!(!result.retry.retried);
    }

    // Both schemes of both hostnames end up in the store
    let storage = SqliteStorage::new(Path::new(&fixture.db_path())).unwrap();
    let keys: Vec<String> = ["alpha.test", "beta.test"]
        .iter()
        .flat_map(|host| {
            ["http", "https"]
                .iter()
                .map(move |scheme| format!("{}://{}/robots.txt", scheme, host))
        })
        .collect();
    assert_eq!(storage.bulk_read_robots(&keys).unwrap().len(), 4);

    // Only robots.txt, the health check and the sitemap were requested
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|request| !request.url.path().starts_with("/private")));
}

#[tokio::test]
async fn test_redirects_are_recorded() {
    let server = MockServer::start().await;
    let port = server.address().port();
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", format!("http://beta.test:{}/new", port).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/.*$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let fixture = Fixture::new();
    let tasks = vec![format!("http://alpha.test:{}/old,campaign-1", port)];
    let config = fixture.config(&tasks, &[], "A", 500);
    Coordinator::new(config).unwrap().run().await.unwrap();

    let results = fixture.results("A");
    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.source, "campaign-1");
    assert_eq!(result.attempt.resp.status_code, 200);
    assert_eq!(result.attempt.redirect_chain.len(), 1);
    assert_eq!(result.attempt.redirect_chain[0].status_code, 301);
    assert!(result.attempt.dst_change.hostname);
    let hosts: HashSet<&str> = result
        .dns_records
        .iter()
        .map(|record| record.hostname.as_str())
        .collect();
    assert!(hosts.contains("alpha.test") && hosts.contains("beta.test"));
}

#[test]
fn test_plan_groups_by_hostname() {
    let fixture = Fixture::new();
    let tasks = vec![
        "http://alpha.test/1".to_string(),
        "not a url".to_string(),
        "http://beta.test/1".to_string(),
        "http://alpha.test/2".to_string(),
    ];
    let config = fixture.config(&tasks, &[], "A", 1_000);

    let (batches, excluded) = Coordinator::new(config).unwrap().plan().unwrap();
    assert_eq!(excluded, 0);
    assert_eq!(batches.len(), 1);
    let sizes: Vec<(String, usize)> = batches[0]
        .iter()
        .map(|group| (group.hostname.clone(), group.len()))
        .collect();
    assert_eq!(
        sizes,
        vec![("alpha.test".to_string(), 2), ("beta.test".to_string(), 1)]
    );
}

#[test]
fn test_missing_excluded_file_is_fatal() {
    let fixture = Fixture::new();
    let mut config = fixture.config(&["http://alpha.test/".to_string()], &[], "A", 1_000);
    config.scan.excluded_file = fixture.path("does-not-exist.txt");

    match Coordinator::new(config) {
        Err(ScanError::MissingFile { .. }) => {}
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("coordinator started without an excluded-hostname file"),
    }
}
