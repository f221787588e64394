//! Scan coordinator - top-level scan orchestration
//!
//! This module wires every component together for one scan:
//! - Opening the result store and loading the input files
//! - Grouping tasks into worker batches
//! - Starting the sink, comparison reader, robots cache and retry engine
//! - Running the workers and waiting until every result is committed

use crate::config::Config;
use crate::fetch::{build_http_client, FetchPipeline};
use crate::retry::RetryEngine;
use crate::robots::{RobotsCache, RobotsFetcher};
use crate::scanner::worker::{run_worker, ScanContext};
use crate::scanner::CompletionTracker;
use crate::storage::{
    open_storage, BatchReader, BulkSource, CollectionSource, ResultSink, ResultStore,
    RobotsStore, SitemapStore, SqliteStorage, StorageError,
};
use crate::state::TaskPrint;
use crate::tasks::{
    filter_excluded, group_by_hostname, pack_batches, read_task_lines, ExcludedHosts, WorkerBatch,
};
use crate::ScanError;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Outcome counts of a finished scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Tasks scheduled after exclusion filtering and deduplication
    pub tasks: usize,
    pub hosts: usize,
    pub workers: usize,
    /// Tasks dropped at startup because their hostname is excluded
    pub excluded: usize,
    pub retried: usize,
}

/// Main scan coordinator structure
pub struct Coordinator {
    config: Arc<Config>,
    storage: Arc<SqliteStorage>,
    excluded: Arc<ExcludedHosts>,
}

impl Coordinator {
    /// Creates a coordinator, opening the store and the excluded-hostname list
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Ready to plan or run
    /// * `Err(ScanError::StoreUnavailable)` - The database could not be opened
    /// * `Err(ScanError::MissingFile)` - The excluded-hostname file could not be read
    pub fn new(config: Config) -> Result<Self, ScanError> {
        let storage = open_storage(Path::new(&config.database.path))?;
        let excluded = ExcludedHosts::load(&config.scan.excluded_file)?;
        tracing::info!("Loaded {} excluded hostnames", excluded.len());

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            excluded: Arc::new(excluded),
        })
    }

    /// Reads, filters and groups the input into worker batches
    ///
    /// # Returns
    ///
    /// The batches plus the number of tasks dropped for excluded hostnames
    pub fn plan(&self) -> Result<(Vec<WorkerBatch>, usize), ScanError> {
        let tasks = read_task_lines(&self.config.scan.input_file)?;
        let read = tasks.len();
        let (tasks, excluded) = filter_excluded(tasks, &self.excluded);
        let groups = group_by_hostname(tasks);
        let batches = pack_batches(groups, self.config.scan.worker_stress);

        tracing::info!(
            "Planned {} tasks from {} input lines into {} workers ({} excluded)",
            count_tasks(&batches),
            read,
            batches.len(),
            excluded
        );
        Ok((batches, excluded))
    }

    /// Runs the scan to completion
    ///
    /// Returns once every result (and every retry) has been committed and one
    /// more flush interval has passed.
    pub async fn run(&self) -> Result<ScanSummary, ScanError> {
        let started = Instant::now();
        let config = &self.config;
        let (batches, excluded) = self.plan()?;
        let tasks = count_tasks(&batches);
        let hosts: usize = batches.iter().map(Vec::len).sum();

        let results: Arc<dyn ResultStore> = self.storage.clone();
        let robots_store: Arc<dyn RobotsStore> = self.storage.clone();
        let sitemaps: Arc<dyn SitemapStore> = self.storage.clone();

        {
            let store = Arc::clone(&results);
            tokio::task::spawn_blocking(move || store.create_index_if_absent("url"))
                .await
                .map_err(|e| StorageError::Database(e.to_string()))??;
        }

        let tracker = CompletionTracker::new();
        tracker.add(tasks);

        let mut background = Vec::new();

        let (sink, sink_handle) = ResultSink::spawn(
            Arc::clone(&results),
            config.database.collection.clone(),
            config.database.write_frequency(),
            tracker.clone(),
        );

        let comparison = match &config.database.comparison_collection {
            Some(collection) => {
                tracing::info!("Comparing against collection {}", collection);
                let source: Arc<dyn BulkSource<TaskPrint>> =
                    Arc::new(CollectionSource::new(Arc::clone(&results), collection.clone()));
                let (reader, handle) =
                    BatchReader::spawn(source, config.database.read_batch_interval());
                background.push(handle);
                Some(reader)
            }
            None => None,
        };

        let pipeline = Arc::new(FetchPipeline::new(config)?);
        let engine = RetryEngine::new(
            Arc::clone(&pipeline),
            comparison,
            sink,
            tracker.clone(),
        );
        let (retry_handle, retry_task) = engine.spawn(config.retry.politeness());
        background.push(retry_task);

        let (robots, robots_handle) = RobotsCache::new(robots_store, &config.robots);
        background.push(robots_handle);
        let robots = Arc::new(robots);

        let client = build_http_client(&config.user_agent, &config.dns, config.scan.timeout())?;
        let robots_fetcher = RobotsFetcher::new(client.clone(), config.scan.expected_runtime());

        background.push(
            Arc::clone(&self.excluded).spawn_reload_loop(config.scan.excluded_reload()),
        );

        let ctx = Arc::new(ScanContext {
            config: Arc::clone(config),
            pipeline,
            robots: Arc::clone(&robots),
            robots_fetcher,
            client,
            excluded: Arc::clone(&self.excluded),
            sitemaps,
            results: retry_handle,
        });

        let workers = batches.len();
        tracing::info!(
            "Starting scan of {} tasks across {} hostnames with {} workers",
            tasks,
            hosts,
            workers
        );

        let mut running = JoinSet::new();
        for (id, batch) in batches.into_iter().enumerate() {
            running.spawn(run_worker(id, batch, Arc::clone(&ctx)));
        }
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker failed: {}", e);
            }
        }
        drop(ctx);

        tracing::info!("All workers finished, waiting for results to be committed");
        tracker.wait_idle().await;
        tokio::time::sleep(config.database.write_frequency()).await;

        robots.flush_all().await;
        let retried = engine.retried();

        // The engine holds the last sink handle
        drop(engine);
        for handle in background {
            handle.abort();
        }
        if let Err(e) = sink_handle.await {
            tracing::warn!("Result sink did not shut down cleanly: {}", e);
        }

        let summary = ScanSummary {
            tasks,
            hosts,
            workers,
            excluded,
            retried,
        };
        tracing::info!(
            "Scan finished in {:.1}s: {} tasks, {} retried",
            started.elapsed().as_secs_f64(),
            summary.tasks,
            summary.retried
        );
        Ok(summary)
    }
}

fn count_tasks(batches: &[WorkerBatch]) -> usize {
    batches
        .iter()
        .flat_map(|batch| batch.iter())
        .map(|group| group.len())
        .sum()
}
