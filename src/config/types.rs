use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the scanner
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub scan: ScanConfig,
    #[serde(default)]
    pub robots: RobotsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
}

/// Scan behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// File with one `URL[,source]` task per line
    #[serde(rename = "input-file")]
    pub input_file: PathBuf,

    /// File with one excluded hostname per line
    #[serde(rename = "excluded-file")]
    pub excluded_file: PathBuf,

    /// How often the excluded-hostname file is re-read (seconds)
    #[serde(rename = "excluded-reload-interval", default = "default_excluded_reload")]
    pub excluded_reload_interval: u64,

    /// Target wall-clock runtime that every hostname's tasks are spread over (milliseconds)
    #[serde(rename = "expected-runtime-ms")]
    pub expected_runtime_ms: u64,

    /// Base deadline for each network step (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum number of tasks one worker may own
    #[serde(rename = "worker-stress", default = "default_worker_stress")]
    pub worker_stress: usize,

    /// Transport (TCP/TLS) attempts before giving up
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Pacing slots reserved for the per-hostname warm-up step
    #[serde(rename = "sentinel-politeness", default = "default_sentinel_politeness")]
    pub sentinel_politeness: u32,

    /// Scheme used for the warm-up health check and sitemap fetch
    #[serde(rename = "health-check-scheme", default = "default_health_check_scheme")]
    pub health_check_scheme: String,

    /// Maximum number of body bytes read for the content hash
    #[serde(rename = "hash-buffer-len", default = "default_hash_buffer_len")]
    pub hash_buffer_len: usize,

    /// Process-wide cap on concurrent TLS handshakes
    #[serde(rename = "tls-handshake-limit", default)]
    pub tls_handshake_limit: Option<usize>,

    /// Process-wide cap on concurrent GET requests
    #[serde(rename = "get-request-limit", default)]
    pub get_request_limit: Option<usize>,
}

impl ScanConfig {
    pub fn expected_runtime(&self) -> Duration {
        Duration::from_millis(self.expected_runtime_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn excluded_reload(&self) -> Duration {
        Duration::from_secs(self.excluded_reload_interval)
    }
}

/// Robots.txt cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RobotsConfig {
    /// In-memory entries kept before the cache is swept into the store
    #[serde(rename = "buffer-size", default = "default_robots_buffer_size")]
    pub buffer_size: usize,

    /// Tick of the coalescing store reader (milliseconds)
    #[serde(rename = "batch-interval-ms", default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
}

impl Default for RobotsConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_robots_buffer_size(),
            batch_interval_ms: default_batch_interval_ms(),
        }
    }
}

impl RobotsConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// Retry engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Interval at which pending retries are drained and re-dispatched (milliseconds)
    #[serde(rename = "politeness-ms", default = "default_retry_politeness_ms")]
    pub politeness_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            politeness_ms: default_retry_politeness_ms(),
        }
    }
}

impl RetryConfig {
    pub fn politeness(&self) -> Duration {
        Duration::from_millis(self.politeness_ms)
    }
}

/// Result store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: String,

    /// Collection that receives this scan's results
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Previous scan to compare against; retries are disabled when unset
    #[serde(rename = "comparison-collection", default)]
    pub comparison_collection: Option<String>,

    /// Interval of the write-behind result flush (milliseconds)
    #[serde(rename = "write-frequency-ms", default = "default_write_frequency_ms")]
    pub write_frequency_ms: u64,

    /// Tick of the coalescing comparison reader (milliseconds)
    #[serde(rename = "read-batch-interval-ms", default = "default_batch_interval_ms")]
    pub read_batch_interval_ms: u64,
}

impl DatabaseConfig {
    pub fn write_frequency(&self) -> Duration {
        Duration::from_millis(self.write_frequency_ms)
    }

    pub fn read_batch_interval(&self) -> Duration {
        Duration::from_millis(self.read_batch_interval_ms)
    }
}

/// DNS resolution configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Resolver pool; one is chosen at random per lookup
    #[serde(default = "default_dns_servers")]
    pub servers: Vec<String>,

    /// Deadline for a single lookup (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_dns_timeout_ms")]
    pub timeout_ms: u64,

    /// Fixed hostname to IP answers, consulted before the resolver pool
    #[serde(rename = "static-hosts", default)]
    pub static_hosts: HashMap<String, String>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            servers: default_dns_servers(),
            timeout_ms: default_dns_timeout_ms(),
            static_hosts: HashMap::new(),
        }
    }
}

impl DnsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the scanner, also the robots.txt agent token
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the scanner
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the scanner
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for scanner-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

fn default_excluded_reload() -> u64 {
    600
}

fn default_timeout_ms() -> u64 {
    20_000
}

fn default_worker_stress() -> usize {
    5_000
}

fn default_retries() -> u32 {
    3
}

fn default_sentinel_politeness() -> u32 {
    3
}

fn default_health_check_scheme() -> String {
    "https".to_string()
}

fn default_hash_buffer_len() -> usize {
    4_096_000
}

fn default_robots_buffer_size() -> usize {
    3
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_retry_politeness_ms() -> u64 {
    1_000
}

fn default_collection() -> String {
    "T".to_string()
}

fn default_write_frequency_ms() -> u64 {
    5_000
}

fn default_dns_servers() -> Vec<String> {
    ["8.8.8.8", "8.8.4.4", "1.1.1.1", "1.0.0.1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_dns_timeout_ms() -> u64 {
    5_000
}
