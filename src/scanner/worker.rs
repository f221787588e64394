//! Worker dispatch loop
//!
//! A worker drives one [`HostScheduler`]. It sleeps until each step's offset,
//! launches the step as its own task and moves straight on to the next pop,
//! so fetches for different hostnames overlap while each hostname stays paced.

use crate::config::Config;
use crate::fetch::FetchPipeline;
use crate::retry::RetryHandle;
use crate::robots::{RobotsCache, RobotsFetcher};
use crate::scanner::scheduler::{HostScheduler, HostUnit, Step};
use crate::scanner::{sentinel, sitemap};
use crate::state::TaskPrint;
use crate::storage::SitemapStore;
use crate::tasks::{ExcludedHosts, TaskLine, WorkerBatch};
use crate::FetchError;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// Handles shared by every worker of a scan
pub struct ScanContext {
    pub config: Arc<Config>,
    pub pipeline: Arc<FetchPipeline>,
    pub robots: Arc<RobotsCache>,
    pub robots_fetcher: RobotsFetcher,
    /// Client for sitemap fetches
    pub client: reqwest::Client,
    pub excluded: Arc<ExcludedHosts>,
    pub sitemaps: Arc<dyn SitemapStore>,
    /// Every result leaves through here
    pub results: RetryHandle,
}

/// Runs one worker until every hostname in `batch` is exhausted
///
/// Returns after all launched steps have finished.
pub async fn run_worker(id: usize, batch: WorkerBatch, ctx: Arc<ScanContext>) {
    let hosts = batch.len();
    let mut scheduler = HostScheduler::new(
        batch,
        ctx.config.scan.expected_runtime(),
        ctx.config.scan.sentinel_politeness,
    );
    let start = Instant::now();
    let mut in_flight = JoinSet::new();
    let mut dispatched = 0usize;

    tracing::debug!("Worker {} starting with {} hostnames", id, hosts);

    loop {
        let step = scheduler.next_step();
        let Some(at) = step.at() else {
            break;
        };
        sleep_reaping(&mut in_flight, start + at).await;

        match step {
            Step::Sentinel { host, .. } => {
                in_flight.spawn(sentinel::warm_up(Arc::clone(&ctx), host));
            }
            Step::Sitemap { host, .. } => {
                in_flight.spawn(sitemap::capture(Arc::clone(&ctx), host));
            }
            Step::Task { task, host, .. } => {
                dispatched += 1;
                in_flight.spawn(handle_task(Arc::clone(&ctx), task, host));
            }
            Step::Wait(_) | Step::Exhausted => {}
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
    tracing::debug!(
        "Worker {} finished: {} tasks dispatched in {:?}",
        id,
        dispatched,
        start.elapsed()
    );
}

/// Sleeps until `deadline`, reaping finished steps meanwhile
async fn sleep_reaping(in_flight: &mut JoinSet<()>, deadline: Instant) {
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return,
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => log_join(joined),
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Scan step failed: {}", e);
    }
}

/// Fetches one task and hands its result on
async fn handle_task(ctx: Arc<ScanContext>, task: TaskLine, host: Arc<HostUnit>) {
    let sentinel = host.sentinel();
    let mut result = TaskPrint::new(&task);
    result.dns_records = sentinel.dns_records.clone();

    if ctx.excluded.contains(&task.hostname) {
        tracing::debug!("Skipping {}: hostname excluded", task.raw_url);
        result
            .attempt
            .record_error(&FetchError::ExcludedHostname(task.hostname.clone()));
    } else if let Some(err) = sentinel.short_circuit(task.url.scheme()) {
        tracing::debug!("Skipping {}: {}", task.raw_url, err);
        result.attempt.record_error(&err);
    } else {
        ctx.pipeline
            .fetch(&task.url, &mut result.dns_records, &mut result.attempt)
            .await;
    }

    tracing::trace!(
        "{} -> {} {}",
        task.raw_url,
        result.attempt.resp.status_code,
        result.attempt.err
    );
    ctx.results.submit(result).await;
}
