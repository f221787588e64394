//! Scanner module for scheduling and dispatching tasks
//!
//! This module contains the core scan engine, including:
//! - The per-hostname politeness scheduler
//! - Worker dispatch loops
//! - The per-hostname sentinel warm-up and sitemap capture
//! - Completion tracking and overall scan coordination

mod coordinator;
mod scheduler;
mod sentinel;
mod sitemap;
mod tracker;
mod worker;

pub use coordinator::{Coordinator, ScanSummary};
pub use scheduler::{HostScheduler, HostUnit, QueueEntry, Step, SENTINEL_WAIT_BUMP};
pub use sitemap::parse_sitemap;
pub use tracker::CompletionTracker;
pub use worker::{run_worker, ScanContext};

use crate::config::Config;
use crate::ScanError;

/// Runs a complete scan
///
/// This is the main entry point for starting a scan. It will:
/// 1. Open the result store and load the excluded hostnames
/// 2. Read and group the input tasks
/// 3. Run every worker until all tasks are dispatched
/// 4. Wait for results and retries to be committed
///
/// # Arguments
///
/// * `config` - The validated scanner configuration
///
/// # Returns
///
/// * `Ok(ScanSummary)` - Scan completed
/// * `Err(ScanError)` - Startup failed
pub async fn scan(config: Config) -> Result<ScanSummary, ScanError> {
    Coordinator::new(config)?.run().await
}
