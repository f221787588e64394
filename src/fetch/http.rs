//! HTTP GET with manually followed redirects
//!
//! Each request gets its own connection from [`Transport`]. Redirects are
//! followed by hand so that every hop can be resolved through the shared DNS
//! accumulator and recorded on the attempt's redirect chain.

use crate::config::Config;
use crate::fetch::dns::DnsPool;
use crate::fetch::response::{destination_change, is_redirect, redirect_location, summarize};
use crate::fetch::transport::Transport;
use crate::state::{Attempt, DnsRecord, RedirectHop, ResponseSummary};
use crate::{FetchError, FetchResult, ScanError};
use hyper::body::HttpBody;
use hyper::header::{CACHE_CONTROL, CONNECTION, HOST, USER_AGENT};
use hyper::{Body, Method, Request, Response};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::{Position, Url};

/// Redirects followed before the last response is returned as final
pub const MAX_REDIRECTS: usize = 10;

/// A GET whose head has arrived
///
/// The connection task and the admission permit live until the body is read.
struct Exchange {
    response: Response<Body>,
    connection: JoinHandle<()>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Exchange {
    fn close(self) {
        self.connection.abort();
    }
}

/// DNS, transport and HTTP stages behind one call
pub struct FetchPipeline {
    dns: DnsPool,
    transport: Transport,
    user_agent: String,
    timeout: Duration,
    hash_buffer_len: usize,
    get_permits: Option<Arc<Semaphore>>,
}

impl FetchPipeline {
    pub fn new(config: &Config) -> Result<Self, ScanError> {
        Ok(Self {
            dns: DnsPool::new(&config.dns)?,
            transport: Transport::new(&config.scan),
            user_agent: config.user_agent.header_value(),
            timeout: config.scan.timeout(),
            hash_buffer_len: config.scan.hash_buffer_len,
            get_permits: config
                .scan
                .get_request_limit
                .map(|limit| Arc::new(Semaphore::new(limit))),
        })
    }

    /// Fetches `url` and records the outcome on `attempt`
    ///
    /// # Arguments
    ///
    /// * `url` - Target URL; only `http` and `https` are accepted
    /// * `dns_records` - Records already known for this task; lookups made here are appended
    /// * `attempt` - Receives the redirect chain, destination change, response and error
    pub async fn fetch(&self, url: &Url, dns_records: &mut Vec<DnsRecord>, attempt: &mut Attempt) {
        let outcome = self
            .follow(url, dns_records, &mut attempt.redirect_chain)
            .await;
        attempt.dst_change = destination_change(url, &attempt.redirect_chain);
        if let Err(e) = &outcome {
            tracing::debug!("Fetch of {} failed: {}", url, e);
        }
        attempt.record(outcome);
    }

    /// Fetches `url` only for its verdict, discarding the redirect chain
    pub async fn check(
        &self,
        url: &Url,
        dns_records: &mut Vec<DnsRecord>,
    ) -> FetchResult<ResponseSummary> {
        let mut chain = Vec::new();
        self.follow(url, dns_records, &mut chain).await
    }

    async fn follow(
        &self,
        url: &Url,
        dns_records: &mut Vec<DnsRecord>,
        chain: &mut Vec<RedirectHop>,
    ) -> FetchResult<ResponseSummary> {
        check_scheme(url)?;
        let mut current = url.clone();
        let mut ip = self.resolve(host_of(&current)?, dns_records).await?;

        loop {
            let exchange = self.get(&current, ip).await?;
            let status = exchange.response.status();

            if !is_redirect(status) || chain.len() >= MAX_REDIRECTS {
                return self.finish(exchange).await;
            }
            let location = redirect_location(&current, exchange.response.headers());
            let next = match location {
                Ok(Some(next)) => next,
                Ok(None) => return self.finish(exchange).await,
                Err(e) => {
                    exchange.close();
                    return Err(e);
                }
            };
            exchange.close();

            check_scheme(&next)?;
            let next_host = host_of(&next)?;
            if next_host != host_of(&current)? {
                match self.resolve(next_host, dns_records).await {
                    Ok(next_ip) => ip = next_ip,
                    Err(e) => {
                        chain.push(RedirectHop {
                            status_code: 0,
                            location: next.to_string(),
                            location_ip: None,
                        });
                        return Err(e);
                    }
                }
            }

            tracing::trace!("{} redirected ({}) to {}", current, status, next);
            chain.push(RedirectHop {
                status_code: status.as_u16(),
                location: next.to_string(),
                location_ip: Some(ip.to_string()),
            });
            current = next;
        }
    }

    /// IP for `hostname`, reusing a resolved record from the accumulator
    async fn resolve(&self, hostname: &str, dns_records: &mut Vec<DnsRecord>) -> FetchResult<IpAddr> {
        let known = dns_records
            .iter()
            .find(|record| record.hostname == hostname && record.is_resolved())
            .and_then(|record| record.ip.as_deref())
            .and_then(|ip| ip.parse().ok());
        if let Some(ip) = known {
            return Ok(ip);
        }

        let record = self.dns.lookup(hostname).await?;
        let ip = record
            .ip
            .as_deref()
            .and_then(|ip| ip.parse().ok())
            .ok_or_else(|| FetchError::Dns(format!("no usable address for {}", hostname)))?;
        dns_records.retain(|existing| existing.hostname != hostname);
        dns_records.push(record);
        Ok(ip)
    }

    /// Sends one GET over a fresh connection
    ///
    /// With `get-request-limit` set, a permit is taken before dialing and held
    /// by the returned [`Exchange`] until its body has been read.
    async fn get(&self, url: &Url, ip: IpAddr) -> FetchResult<Exchange> {
        let hostname = host_of(url)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::InvalidScheme(url.scheme().to_string()))?;

        let permit = match &self.get_permits {
            Some(permits) => Some(
                Arc::clone(permits)
                    .acquire_owned()
                    .await
                    .map_err(|e| FetchError::Http(e.to_string()))?,
            ),
            None => None,
        };
        let io = self.transport.connect(url.scheme(), hostname, ip, port).await?;

        let (mut sender, connection) = timeout(self.timeout, hyper::client::conn::handshake(io))
            .await
            .map_err(|_| FetchError::Http(format!("HTTP handshake with {} timed out", hostname)))?
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::trace!("Connection closed with error: {}", e);
            }
        });

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", hostname, port),
            None => hostname.to_string(),
        };
        let request = Request::builder()
            .method(Method::GET)
            .uri(&url[Position::BeforePath..Position::AfterQuery])
            .header(HOST, host_header)
            .header(USER_AGENT, self.user_agent.as_str())
            .header(CACHE_CONTROL, "no-cache")
            .header(CONNECTION, "close")
            .body(Body::empty())
            .map_err(|e| FetchError::Http(e.to_string()))?;

        match timeout(self.timeout, sender.send_request(request)).await {
            Ok(Ok(response)) => Ok(Exchange {
                response,
                connection,
                permit,
            }),
            Ok(Err(e)) => {
                connection.abort();
                Err(FetchError::Http(e.to_string()))
            }
            Err(_) => {
                connection.abort();
                Err(FetchError::Http(format!("GET {} timed out after {:?}", url, self.timeout)))
            }
        }
    }

    /// Reads up to `hash_buffer_len` body bytes and summarises the response
    ///
    /// Reading stops once the prefix is full, so `size` never exceeds
    /// `hash_buffer_len` even for larger bodies.
    async fn finish(&self, exchange: Exchange) -> FetchResult<ResponseSummary> {
        let Exchange {
            response,
            connection,
            permit,
        } = exchange;
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = response.into_body();
        let mut hasher = Sha256::new();
        let mut size = 0usize;

        while size < self.hash_buffer_len {
            match timeout(self.timeout, body.data()).await {
                Ok(Some(Ok(chunk))) => {
                    let take = chunk.len().min(self.hash_buffer_len - size);
                    hasher.update(&chunk[..take]);
                    size += take;
                }
                Ok(Some(Err(e))) => {
                    tracing::debug!("Body read stopped after {} bytes: {}", size, e);
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("Body read timed out after {} bytes", size);
                    break;
                }
            }
        }
        drop(body);
        connection.abort();
        drop(permit);

        Ok(summarize(status, &headers, hex::encode(hasher.finalize()), size))
    }
}

fn check_scheme(url: &Url) -> FetchResult<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::InvalidScheme(other.to_string())),
    }
}

fn host_of(url: &Url) -> FetchResult<&str> {
    url.host_str()
        .ok_or_else(|| FetchError::Http(format!("{} has no host", url)))
}
