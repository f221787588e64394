//! Statistics over a persisted scan collection
//!
//! This module summarises the result documents of one collection for the
//! `--stats` mode of the binary.

use crate::state::TaskPrint;
use crate::storage::ResultStore;
use crate::{ErrorKind, ScanError};
use std::collections::{BTreeMap, HashSet};

/// Scan statistics summary
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanStatistics {
    pub collection: String,

    /// Number of result documents
    pub total_results: u64,

    /// Distinct hostnames among the results
    pub unique_hostnames: u64,

    /// Count of results by response status (0 = no response)
    pub by_status: BTreeMap<i32, u64>,

    /// Count of failed results by error kind
    pub by_error: BTreeMap<ErrorKind, u64>,

    /// Results flagged for a second fetch
    pub needs_retry: u64,

    /// Results carrying a retried sub-document
    pub retried: u64,

    /// Retried results whose second status differs from the first
    pub retry_changed: u64,
}

/// Loads statistics for one collection
///
/// # Arguments
///
/// * `store` - The result store to query
/// * `collection` - Collection to summarise
///
/// # Returns
///
/// * `Ok(ScanStatistics)` - Successfully computed statistics
/// * `Err(ScanError)` - Failed to read the collection
pub fn load_statistics(
    store: &dyn ResultStore,
    collection: &str,
) -> Result<ScanStatistics, ScanError> {
    let results = store.all_results(collection)?;
    Ok(summarize_results(collection, &results))
}

fn summarize_results(collection: &str, results: &[TaskPrint]) -> ScanStatistics {
    let mut stats = ScanStatistics {
        collection: collection.to_string(),
        total_results: results.len() as u64,
        ..ScanStatistics::default()
    };
    let mut hostnames = HashSet::new();

    for result in results {
        hostnames.insert(result.hostname.as_str());
        *stats
            .by_status
            .entry(result.attempt.resp.status_code)
            .or_insert(0) += 1;
        if let Some(kind) = result.attempt.err_kind {
            *stats.by_error.entry(kind).or_insert(0) += 1;
        }
        if result.needs_retry {
            stats.needs_retry += 1;
        }
        if result.retry.retried {
            stats.retried += 1;
            if result.retry.attempt.resp.status_code != result.attempt.resp.status_code {
                stats.retry_changed += 1;
            }
        }
    }

    stats.unique_hostnames = hostnames.len() as u64;
    stats
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &ScanStatistics) {
    println!("=== Scan Statistics: {} ===\n", stats.collection);

    println!("Overview:");
    println!("  Total results: {}", stats.total_results);
    println!("  Unique hostnames: {}", stats.unique_hostnames);
    println!();

    println!("Results by Status:");
    // Sort statuses by count (descending)
    let mut status_counts: Vec<_> = stats.by_status.iter().collect();
    status_counts.sort_by(|a, b| b.1.cmp(a.1));

    for (status, count) in status_counts {
        let percentage = if stats.total_results > 0 {
            (*count as f64 / stats.total_results as f64) * 100.0
        } else {
            0.0
        };
        let label = if *status == 0 {
            "no response".to_string()
        } else {
            status.to_string()
        };
        println!("  {}: {} ({:.1}%)", label, count, percentage);
    }
    println!();

    if !stats.by_error.is_empty() {
        println!("Error Summary:");
        let mut error_counts: Vec<_> = stats.by_error.iter().collect();
        error_counts.sort_by(|a, b| b.1.cmp(a.1));

        for (kind, count) in error_counts {
            println!("  {}: {}", kind.as_str(), count);
        }
        println!();
    }

    println!("Retries:");
    println!("  Flagged: {}", stats.needs_retry);
    println!("  Retried: {}", stats.retried);
    println!("  Outcome changed on retry: {}", stats.retry_changed);
}
