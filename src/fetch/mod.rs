//! Fetch module
//!
//! This module turns a URL into a recorded attempt:
//! - DNS resolution over a randomly chosen resolver from a pool
//! - One-shot TCP connections, wrapped in TLS for https
//! - HTTP GET with manually followed, individually resolved redirects
//! - Response summaries (headers, ETag, content hash)
//!
//! Auxiliary fetches (robots.txt, sitemaps) go through a shared reqwest
//! client built by [`build_http_client`].

mod dns;
mod http;
mod response;
mod transport;

pub use dns::DnsPool;
pub use http::{FetchPipeline, MAX_REDIRECTS};
pub use response::{destination_change, summarize};
pub use transport::{BoxedIo, Io, Transport};

use crate::config::{DnsConfig, UserAgentConfig};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Builds the client used for robots.txt and sitemap requests
///
/// # Arguments
///
/// * `user_agent` - Identification sent with every request
/// * `dns` - Static host overrides are applied to the client's resolver
/// * `timeout` - Whole-request deadline
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    dns: &DnsConfig,
    timeout: Duration,
) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .user_agent(user_agent.header_value())
        .timeout(timeout)
        .redirect(Policy::limited(MAX_REDIRECTS))
        .pool_max_idle_per_host(0);

    for (host, ip) in &dns.static_hosts {
        if let Ok(ip) = ip.parse::<IpAddr>() {
            // Port is ignored by reqwest; the URL's port is used
            builder = builder.resolve(host, SocketAddr::new(ip, 0));
        }
    }

    builder.build()
}
