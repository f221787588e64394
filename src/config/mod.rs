//! Configuration module for the scanner
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The loaded [`Config`] is immutable and is shared as `Arc<Config>` with every
//! component that needs it.
//!
//! # Example
//!
//! ```no_run
//! use polite_scan::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("scan.toml")).unwrap();
//! println!("Spreading each hostname over {}ms", config.scan.expected_runtime_ms);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, DatabaseConfig, DnsConfig, RetryConfig, RobotsConfig, ScanConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::validate;
