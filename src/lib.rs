//! polite-scan: a politeness-constrained URL scanner
//!
//! This crate fetches a supplied list of URLs while spreading each hostname's
//! requests evenly over a target runtime, honoring robots.txt, classifying
//! connection-layer failures, and re-fetching results that disagree with a
//! previous scan stored in the database.

pub mod config;
pub mod fetch;
pub mod output;
pub mod retry;
pub mod robots;
pub mod scanner;
pub mod state;
pub mod storage;
pub mod tasks;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Process-level error type
///
/// These are failures of the scanner itself (bad config, unreachable store,
/// missing input files). Per-URL failures are [`FetchError`]s and are recorded
/// on the result document instead.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Result store unavailable at {path}: {message}")]
    StoreUnavailable { path: String, message: String },

    #[error("Required file {path} could not be read: {source}")]
    MissingFile {
        path: String,
        source: std::io::Error,
    },

    #[error("DNS resolver setup failed: {0}")]
    Resolver(String),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Failure of a single fetch
///
/// The display text of each variant starts with a fixed prefix so that
/// persisted documents can be grouped by failure layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("DNS error: {0}")]
    Dns(String),

    #[error("TCP error: {0}")]
    Tcp(String),

    #[error("TLS handshake error: {0}")]
    Tls(String),

    #[error("HTTP request error: {0}")]
    Http(String),

    #[error("path {path} not allowed by robots.txt")]
    RobotsDisallowed { path: String },

    #[error("excluded hostname: {0}")]
    ExcludedHostname(String),

    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
}

impl FetchError {
    /// Returns the serializable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Dns(_) => ErrorKind::Dns,
            Self::Tcp(_) => ErrorKind::Tcp,
            Self::Tls(_) => ErrorKind::Tls,
            Self::Http(_) => ErrorKind::Http,
            Self::RobotsDisallowed { .. } => ErrorKind::RobotsDisallowed,
            Self::ExcludedHostname(_) => ErrorKind::ExcludedHostname,
            Self::InvalidScheme(_) => ErrorKind::InvalidScheme,
        }
    }
}

/// Stored classification of a [`FetchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Dns,
    Tcp,
    Tls,
    Http,
    RobotsDisallowed,
    ExcludedHostname,
    InvalidScheme,
}

impl ErrorKind {
    /// Policy rejections are decisions, not transient failures, and are never retried
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::RobotsDisallowed | Self::ExcludedHostname)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Tcp => "tcp",
            Self::Tls => "tls",
            Self::Http => "http",
            Self::RobotsDisallowed => "robots_disallowed",
            Self::ExcludedHostname => "excluded_hostname",
            Self::InvalidScheme => "invalid_scheme",
        }
    }
}

/// Result type alias for scanner operations
pub type Result<T> = std::result::Result<T, ScanError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for single-fetch operations
pub type FetchResult<T> = std::result::Result<T, FetchError>;

// Re-export commonly used types
pub use config::Config;
pub use scanner::{Coordinator, ScanSummary};
pub use state::TaskPrint;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_prefixes() {
        assert!(FetchError::Dns("nxdomain".into())
            .to_string()
            .starts_with("DNS"));
        assert!(FetchError::Tcp("refused".into())
            .to_string()
            .starts_with("TCP error: "));
        assert!(FetchError::Tls("bad cert".into())
            .to_string()
            .starts_with("TLS handshake error: "));
        assert!(FetchError::Http("reset".into())
            .to_string()
            .starts_with("HTTP request error: "));
        assert!(FetchError::RobotsDisallowed {
            path: "/private".into()
        }
        .to_string()
        .starts_with("path"));
    }

    #[test]
    fn test_policy_kinds() {
        assert!(ErrorKind::RobotsDisallowed.is_policy());
        assert!(ErrorKind::ExcludedHostname.is_policy());
        assert!(!ErrorKind::Dns.is_policy());
        assert!(!ErrorKind::Http.is_policy());
    }
}
