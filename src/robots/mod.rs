//! Robots.txt handling module
//!
//! This module fetches, caches and matches robots.txt files. Rules are kept
//! per `scheme://host`, fetched at most once per expiry window, and persisted
//! through the cache's write-behind buffer.

mod cache;
mod parser;

pub use cache::{robots_key, RobotsCache, RobotsEntry};
pub use parser::RobotsRules;

use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

/// Fetches robots.txt bodies
///
/// Any failure yields an allow-all entry, so a host without a readable
/// robots.txt is fetched normally and not asked again until expiry.
#[derive(Clone)]
pub struct RobotsFetcher {
    client: Client,
    default_ttl: Duration,
}

impl RobotsFetcher {
    /// # Arguments
    ///
    /// * `client` - HTTP client carrying the scanner's User-Agent
    /// * `default_ttl` - Lifetime of entries whose response has no usable `Expires` header
    pub fn new(client: Client, default_ttl: Duration) -> Self {
        Self {
            client,
            default_ttl,
        }
    }

    /// Fetches `scheme://hostname[:port]/robots.txt`
    pub async fn fetch(&self, scheme: &str, hostname: &str, port: Option<u16>) -> RobotsEntry {
        let key = robots_key(scheme, hostname);
        let target = match port {
            Some(port) => format!("{}://{}:{}/robots.txt", scheme, hostname, port),
            None => key.clone(),
        };
        let now = Utc::now();
        let fallback_expiry = now
            + chrono::Duration::from_std(self.default_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let response = match self.client.get(&target).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("robots.txt fetch failed for {}: {}", target, e);
                return RobotsEntry::new(key, String::new(), fallback_expiry);
            }
        };

        let expires_at = response
            .headers()
            .get(header::EXPIRES)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_expires)
            .filter(|expiry| *expiry > now)
            .unwrap_or(fallback_expiry);

        if response.status() != StatusCode::OK {
            tracing::debug!("robots.txt for {} returned {}", target, response.status());
            return RobotsEntry::new(key, String::new(), expires_at);
        }

        match response.text().await {
            Ok(body) => RobotsEntry::new(key, body, expires_at),
            Err(e) => {
                tracing::debug!("robots.txt body for {} unreadable: {}", target, e);
                RobotsEntry::new(key, String::new(), expires_at)
            }
        }
    }
}

/// Parses an HTTP date such as `Wed, 21 Oct 2015 07:28:00 GMT`
fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> RobotsFetcher {
        RobotsFetcher::new(Client::new(), Duration::from_secs(60))
    }

    fn port_of(server: &MockServer) -> u16 {
        server.address().port()
    }

    #[test]
    fn test_parse_expires() {
        let parsed = parse_expires("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2015-10-21T07:28:00+00:00");
        assert!(parse_expires("tomorrow").is_none());
    }

    #[tokio::test]
    async fn test_fetch_uses_body_and_expires_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private")
                    .insert_header("Expires", "Fri, 01 Jan 2100 00:00:00 GMT"),
            )
            .mount(&server)
            .await;

        let entry = fetcher()
            .fetch("http", "127.0.0.1", Some(port_of(&server)))
            .await;

        assert_eq!(entry.url, "http://127.0.0.1/robots.txt");
        assert!(!entry.allows("http://127.0.0.1/private", "PoliteScan"));
        assert_eq!(entry.expires_at.to_rfc3339(), "2100-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_missing_robots_allows_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let entry = fetcher()
            .fetch("http", "127.0.0.1", Some(port_of(&server)))
            .await;

        assert!(entry.body.is_empty());
        assert!(entry.allows("http://127.0.0.1/anything", "PoliteScan"));
        assert!(entry.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_unreachable_host_allows_all() {
        let entry = fetcher().fetch("http", "127.0.0.1", Some(1)).await;
        assert!(entry.body.is_empty());
    }
}
