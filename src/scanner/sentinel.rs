//! Per-hostname warm-up
//!
//! Before a hostname's tasks are released the sentinel:
//! 1. Sends one health-check GET to `/`, keeping DNS answers and any error
//! 2. Primes the robots cache for `http` and `https`
//! 3. Drops queued tasks robots.txt disallows, reporting each as a result
//! 4. Queues a single sitemap fetch at a random position

use crate::robots::RobotsEntry;
use crate::scanner::scheduler::HostUnit;
use crate::scanner::ScanContext;
use crate::state::TaskPrint;
use crate::FetchError;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

const ROBOTS_SCHEMES: [&str; 2] = ["http", "https"];

pub async fn warm_up(ctx: Arc<ScanContext>, host: Arc<HostUnit>) {
    let scheme = &ctx.config.scan.health_check_scheme;
    let mut dns_records = Vec::new();

    let health = match Url::parse(&format!("{}://{}/", scheme, host.authority())) {
        Ok(url) => ctx.pipeline.check(&url, &mut dns_records).await.err(),
        Err(e) => Some(FetchError::Http(e.to_string())),
    };
    if let Some(err) = &health {
        tracing::info!("Health check for {} failed: {}", host.hostname, err);
    }

    let mut robots: HashMap<&str, RobotsEntry> = HashMap::new();
    for scheme in ROBOTS_SCHEMES {
        let entry = ctx
            .robots
            .get_or_fetch(&ctx.robots_fetcher, scheme, &host.hostname, host.port)
            .await;
        robots.insert(scheme, entry);
    }

    let agent = ctx.config.user_agent.crawler_name.as_str();
    let rejected = host.filter_and_mark(|task| {
        robots
            .get(task.url.scheme())
            .map_or(true, |entry| entry.allows(task.url.as_str(), agent))
    });

    host.complete_sentinel(health, dns_records.clone());
    tracing::debug!(
        "Sentinel for {} done: {} tasks disallowed, {} queued",
        host.hostname,
        rejected.len(),
        host.queue_len()
    );

    for task in rejected {
        let err = FetchError::RobotsDisallowed {
            path: task.url.path().to_string(),
        };
        let mut result = TaskPrint::rejected(&task, &err);
        result.dns_records = dns_records.clone();
        ctx.results.submit(result).await;
    }
}
