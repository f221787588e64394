//! DNS resolution over a pool of resolvers
//!
//! Every lookup goes to a randomly chosen server from the configured pool.
//! Address records decide success; CNAME, MX, NS, TXT and PTR answers are
//! collected opportunistically and never fail a lookup.

use crate::config::DnsConfig;
use crate::state::DnsRecord;
use crate::{FetchError, FetchResult, ScanError};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::timeout;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::proto::rr::RData;
use trust_dns_resolver::TokioAsyncResolver;

/// Resolver pool plus fixed answers
pub struct DnsPool {
    resolvers: Vec<TokioAsyncResolver>,
    static_hosts: HashMap<String, IpAddr>,
    timeout: Duration,
}

impl DnsPool {
    /// Builds one resolver per configured server
    ///
    /// # Returns
    ///
    /// * `Ok(DnsPool)` - Pool ready for lookups
    /// * `Err(ScanError::Resolver)` - A server address or resolver could not be set up
    pub fn new(config: &DnsConfig) -> Result<Self, ScanError> {
        let mut resolvers = Vec::with_capacity(config.servers.len());
        for server in &config.servers {
            let ip: IpAddr = server
                .parse()
                .map_err(|_| ScanError::Resolver(format!("'{}' is not an IP address", server)))?;

            let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
            let resolver_config = ResolverConfig::from_parts(None, vec![], group);
            let mut opts = ResolverOpts::default();
            opts.timeout = config.timeout();
            opts.attempts = 1;

            let resolver = TokioAsyncResolver::tokio(resolver_config, opts)
                .map_err(|e| ScanError::Resolver(e.to_string()))?;
            resolvers.push(resolver);
        }

        let mut static_hosts = HashMap::new();
        for (host, ip) in &config.static_hosts {
            let ip: IpAddr = ip.parse().map_err(|_| {
                ScanError::Resolver(format!("static host {} maps to invalid IP '{}'", host, ip))
            })?;
            static_hosts.insert(host.clone(), ip);
        }

        Ok(Self {
            resolvers,
            static_hosts,
            timeout: config.timeout(),
        })
    }

    /// Resolves `hostname` into a full record
    pub async fn lookup(&self, hostname: &str) -> FetchResult<DnsRecord> {
        if let Some(ip) = literal_ip(hostname) {
            return Ok(DnsRecord::fixed(hostname, ip));
        }
        if let Some(ip) = self.static_hosts.get(hostname) {
            return Ok(DnsRecord::fixed(hostname, *ip));
        }

        let resolver = self
            .resolvers
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| FetchError::Dns("no resolvers configured".to_string()))?;

        let answer = timeout(self.timeout, resolver.lookup_ip(hostname))
            .await
            .map_err(|_| FetchError::Dns(format!("lookup of {} timed out", hostname)))?
            .map_err(|e| FetchError::Dns(e.to_string()))?;

        let all: Vec<IpAddr> = answer.iter().collect();
        let primary = all
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| all.first())
            .copied()
            .ok_or_else(|| FetchError::Dns(format!("no addresses for {}", hostname)))?;

        let cname: Vec<String> = answer
            .as_lookup()
            .record_iter()
            .filter_map(|record| match record.data() {
                Some(RData::CNAME(name)) => Some(name.to_string()),
                _ => None,
            })
            .collect();

        let (mx, ns, txt, ptr) = tokio::join!(
            self.mx(resolver, hostname),
            self.ns(resolver, hostname),
            self.txt(resolver, hostname),
            self.ptr(resolver, primary),
        );

        Ok(DnsRecord {
            hostname: hostname.to_string(),
            ip: Some(primary.to_string()),
            all_ips: all.iter().map(IpAddr::to_string).collect(),
            cname,
            mx,
            ns,
            txt,
            ptr,
        })
    }

    async fn mx(&self, resolver: &TokioAsyncResolver, hostname: &str) -> Vec<String> {
        match timeout(self.timeout, resolver.mx_lookup(hostname)).await {
            Ok(Ok(answer)) => answer
                .iter()
                .map(|mx| format!("{} {}", mx.exchange(), mx.preference()))
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn ns(&self, resolver: &TokioAsyncResolver, hostname: &str) -> Vec<String> {
        match timeout(self.timeout, resolver.ns_lookup(hostname)).await {
            Ok(Ok(answer)) => answer.iter().map(|ns| ns.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    async fn txt(&self, resolver: &TokioAsyncResolver, hostname: &str) -> Vec<String> {
        match timeout(self.timeout, resolver.txt_lookup(hostname)).await {
            Ok(Ok(answer)) => answer
                .iter()
                .map(|txt| {
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part).into_owned())
                        .collect::<String>()
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn ptr(&self, resolver: &TokioAsyncResolver, ip: IpAddr) -> Vec<String> {
        match timeout(self.timeout, resolver.reverse_lookup(ip)).await {
            Ok(Ok(answer)) => answer.iter().map(|name| name.to_string()).collect(),
            _ => Vec::new(),
        }
    }
}

/// IP literal hosts (`127.0.0.1`, `[::1]`) need no lookup
fn literal_ip(hostname: &str) -> Option<IpAddr> {
    hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}
