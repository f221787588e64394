//! Retry engine
//!
//! Every finished result passes through here on its way to the result sink.
//! A result is compared with the same URL in the previous scan's collection;
//! when the outcome changed it is queued for a second fetch. Queued retries
//! are drained once per tick and spread evenly across that tick.

use crate::fetch::FetchPipeline;
use crate::scanner::CompletionTracker;
use crate::state::{RetryAttempt, TaskPrint};
use crate::storage::{BatchReader, ResultSink};
use crate::FetchError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

/// Capacity of the intake queue
const INTAKE_QUEUE_CAPACITY: usize = 50_000;

/// Whether `current` should be fetched again
///
/// Policy rejections never are. Without a prior result there is nothing to
/// compare against. Otherwise the prior's effective attempt is compared on
/// status code and final redirect destination; content differences (ETag,
/// body hash) are only logged.
pub fn needs_retry(current: &TaskPrint, prior: Option<&TaskPrint>) -> bool {
    if current.is_policy_rejection() {
        return false;
    }
    let Some(prior) = prior else {
        return false;
    };

    let baseline = prior.effective_attempt();
    let now = &current.attempt;
    let status_changed = baseline.resp.status_code != now.resp.status_code;
    let destination_changed = baseline.final_destination() != now.final_destination();

    if !status_changed && !destination_changed {
        let content_changed =
            baseline.resp.etag != now.resp.etag || baseline.resp.self_hash != now.resp.self_hash;
        if content_changed {
            tracing::debug!("Content of {} changed since the previous scan", current.url);
        }
    }

    status_changed || destination_changed
}

/// Handle for passing finished results to the engine
#[derive(Clone)]
pub struct RetryHandle {
    results: mpsc::Sender<TaskPrint>,
}

impl RetryHandle {
    pub async fn submit(&self, result: TaskPrint) {
        let url = result.url.clone();
        if self.results.send(result).await.is_err() {
            tracing::error!("Retry engine stopped; dropping result for {}", url);
        }
    }
}

/// Compares results with the previous scan and re-fetches changed ones
pub struct RetryEngine {
    pipeline: Arc<FetchPipeline>,
    comparison: Option<BatchReader<TaskPrint>>,
    sink: ResultSink,
    tracker: CompletionTracker,
    pending: Mutex<Vec<TaskPrint>>,
    retried: AtomicUsize,
}

impl RetryEngine {
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline used for the second fetch
    /// * `comparison` - Reader over the previous scan; `None` disables retries
    /// * `sink` - Destination of first-pass and retried results
    /// * `tracker` - Counts one extra result per queued retry
    pub fn new(
        pipeline: Arc<FetchPipeline>,
        comparison: Option<BatchReader<TaskPrint>>,
        sink: ResultSink,
        tracker: CompletionTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            comparison,
            sink,
            tracker,
            pending: Mutex::new(Vec::new()),
            retried: AtomicUsize::new(0),
        })
    }

    /// Number of retries dispatched so far
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<TaskPrint>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Starts the intake and retry tick loop
    ///
    /// The loop keeps ticking after every handle is dropped so that queued
    /// retries still go out; abort the returned task to stop it.
    pub fn spawn(self: &Arc<Self>, tick: Duration) -> (RetryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INTAKE_QUEUE_CAPACITY);
        let handle = tokio::spawn(Arc::clone(self).run(rx, tick));
        (RetryHandle { results: tx }, handle)
    }

    async fn run(self: Arc<Self>, mut results: mpsc::Receiver<TaskPrint>, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut intake_open = true;

        loop {
            tokio::select! {
                received = results.recv(), if intake_open => match received {
                    Some(result) => {
                        tokio::spawn(Arc::clone(&self).evaluate(result));
                    }
                    None => intake_open = false,
                },
                _ = interval.tick() => self.dispatch_pending(tick),
            }
        }
    }

    /// Decides on one result and hands it to the sink
    async fn evaluate(self: Arc<Self>, mut result: TaskPrint) {
        let prior = match &self.comparison {
            Some(reader) if !result.is_policy_rejection() => reader.get(&result.url).await,
            _ => None,
        };

        let retry = needs_retry(&result, prior.as_ref());
        if retry {
            result.needs_retry = true;
            self.tracker.add(1);
        }
        let queued = retry.then(|| result.clone());
        self.sink.submit(result).await;

        if let Some(result) = queued {
            tracing::debug!("Queued {} for retry", result.url);
            self.pending().push(result);
        }
    }

    /// Spreads the queued retries uniformly over one tick
    fn dispatch_pending(self: &Arc<Self>, tick: Duration) {
        let batch: Vec<TaskPrint> = std::mem::take(&mut *self.pending());
        if batch.is_empty() {
            return;
        }

        let pacing = tick / batch.len() as u32;
        tracing::debug!("Dispatching {} retries every {:?}", batch.len(), pacing);
        for (i, result) in batch.into_iter().enumerate() {
            let delay = pacing * i as u32;
            tokio::spawn(Arc::clone(self).refetch(result, delay));
        }
    }

    /// Fetches a result again, bypassing robots checks, and forwards it
    async fn refetch(self: Arc<Self>, mut result: TaskPrint, delay: Duration) {
        tokio::time::sleep(delay).await;

        result.retry = RetryAttempt {
            retried: true,
            ..RetryAttempt::default()
        };
        match Url::parse(&result.url) {
            Ok(url) => {
                let mut dns_records = result.dns_records.clone();
                self.pipeline
                    .fetch(&url, &mut dns_records, &mut result.retry.attempt)
                    .await;
            }
            Err(e) => result
                .retry
                .attempt
                .record_error(&FetchError::Http(e.to_string())),
        }

        self.retried.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Retried {}: {} -> {}",
            result.url,
            result.attempt.resp.status_code,
            result.retry.attempt.resp.status_code
        );
        self.sink.submit(result).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Attempt, RedirectHop, ResponseSummary};
    use crate::ErrorKind;

    fn print(status: i32, destination: Option<&str>) -> TaskPrint {
        let mut attempt = Attempt {
            resp: ResponseSummary {
                status_code: status,
                ..ResponseSummary::default()
            },
            ..Attempt::default()
        };
        if let Some(location) = destination {
            attempt.redirect_chain.push(RedirectHop {
                status_code: 301,
                location: location.to_string(),
                location_ip: Some("192.0.2.10".to_string()),
            });
        }
        TaskPrint {
            url: "https://example.com/".to_string(),
            attempt,
            ..TaskPrint::default()
        }
    }

    #[test]
    fn test_same_outcome_needs_no_retry() {
        assert!(!needs_retry(&print(200, None), Some(&print(200, None))));
    }

    #[test]
    fn test_status_change_needs_retry() {
        assert!(needs_retry(&print(200, None), Some(&print(-1, None))));
        assert!(needs_retry(&print(404, None), Some(&print(200, None))));
    }

    #[test]
    fn test_destination_change_needs_retry() {
        let prior = print(200, Some("https://example.com/a"));
        assert!(needs_retry(&print(200, Some("https://example.com/b")), Some(&prior)));
        assert!(needs_retry(&print(200, None), Some(&prior)));
        assert!(!needs_retry(&print(200, Some("https://example.com/a")), Some(&prior)));
    }

    #[test]
    fn test_no_prior_needs_no_retry() {
        assert!(!needs_retry(&print(500, None), None));
    }

    #[test]
    fn test_policy_rejection_never_retried() {
        let mut current = print(0, None);
        current.attempt.record_error(&FetchError::RobotsDisallowed {
            path: "/private".to_string(),
        });
        assert_eq!(current.attempt.err_kind, Some(ErrorKind::RobotsDisallowed));
        assert!(!needs_retry(&current, Some(&print(200, None))));

        let mut excluded = print(0, None);
        excluded
            .attempt
            .record_error(&FetchError::ExcludedHostname("example.com".to_string()));
        assert!(!needs_retry(&excluded, Some(&print(200, None))));
    }

    #[test]
    fn test_prior_retry_is_the_baseline() {
        let mut prior = print(500, None);
        prior.retry = RetryAttempt {
            retried: true,
            attempt: print(200, None).attempt,
        };
        assert!(!needs_retry(&print(200, None), Some(&prior)));

        // A rate-limited retry is ignored in favour of the first attempt
        prior.retry.attempt.resp.status_code = 429;
        assert!(needs_retry(&print(200, None), Some(&prior)));
    }

    #[test]
    fn test_content_change_alone_needs_no_retry() {
        let mut prior = print(200, None);
        prior.attempt.resp.etag = "v1".to_string();
        let mut current = print(200, None);
        current.attempt.resp.etag = "v2".to_string();
        assert!(!needs_retry(&current, Some(&prior)));
    }
}
