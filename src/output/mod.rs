//! Output module for reporting on scans
//!
//! This module handles:
//! - Summarising a persisted result collection
//! - Printing those statistics for the `--stats` mode

pub mod stats;

pub use stats::{load_statistics, print_statistics, ScanStatistics};
