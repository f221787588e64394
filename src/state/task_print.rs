//! Result documents produced by every dispatched task
//!
//! A [`TaskPrint`] is created when a task is popped from the scheduler, filled
//! in by the fetch pipeline, inspected by the retry engine and finally written
//! by the result sink. A retried task carries a second [`Attempt`] of the same
//! shape under `retry`.

use crate::tasks::TaskLine;
use crate::{ErrorKind, FetchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DNS answers gathered for one hostname
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsRecord {
    pub hostname: String,
    /// First IPv4 answer, or the first answer of any family
    pub ip: Option<String>,
    pub all_ips: Vec<String>,
    pub cname: Vec<String>,
    /// `"exchange preference"` pairs
    pub mx: Vec<String>,
    pub ns: Vec<String>,
    pub txt: Vec<String>,
    pub ptr: Vec<String>,
}

impl DnsRecord {
    /// Record for a host that needs no lookup (IP literal or static override)
    pub fn fixed(hostname: &str, ip: std::net::IpAddr) -> Self {
        Self {
            hostname: hostname.to_string(),
            ip: Some(ip.to_string()),
            all_ips: vec![ip.to_string()],
            ..Self::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.ip.is_some()
    }
}

/// One followed redirect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedirectHop {
    /// Status of the redirecting response; 0 when the target never resolved
    pub status_code: u16,
    pub location: String,
    pub location_ip: Option<String>,
}

/// Which parts of the final destination differ from the requested URL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DstChange {
    pub scheme: bool,
    pub hostname: bool,
    pub path: bool,
    pub query: bool,
}

impl DstChange {
    pub fn any(&self) -> bool {
        self.scheme || self.hostname || self.path || self.query
    }
}

/// Summary of the last HTTP response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseSummary {
    /// 0 when no response was received
    pub status_code: i32,
    pub headers: BTreeMap<String, String>,
    /// ETag header with surrounding quotes removed
    pub etag: String,
    /// Hex SHA-256 of the body prefix that was read
    pub self_hash: String,
    /// Body bytes read and hashed, capped at `hash-buffer-len`
    ///
    /// This is not the full response size when the body is longer.
    pub size: usize,
}

/// Outcome of one pass through the fetch pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attempt {
    pub redirect_chain: Vec<RedirectHop>,
    pub dst_change: DstChange,
    pub resp: ResponseSummary,
    pub err: String,
    pub err_kind: Option<ErrorKind>,
}

impl Attempt {
    /// Stores the pipeline's verdict on this attempt
    pub fn record(&mut self, outcome: Result<ResponseSummary, FetchError>) {
        match outcome {
            Ok(resp) => self.resp = resp,
            Err(err) => self.record_error(&err),
        }
    }

    pub fn record_error(&mut self, err: &FetchError) {
        self.err = err.to_string();
        self.err_kind = Some(err.kind());
    }

    /// Location of the last followed redirect, if any
    pub fn final_destination(&self) -> Option<&str> {
        self.redirect_chain.last().map(|hop| hop.location.as_str())
    }
}

/// The retry sub-document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryAttempt {
    pub retried: bool,
    #[serde(flatten)]
    pub attempt: Attempt,
}

/// Printable result of one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskPrint {
    pub source: String,
    pub hostname: String,
    pub url: String,
    pub dns_records: Vec<DnsRecord>,
    #[serde(flatten)]
    pub attempt: Attempt,
    pub needs_retry: bool,
    pub retry: RetryAttempt,
}

impl TaskPrint {
    pub fn new(task: &TaskLine) -> Self {
        Self {
            source: task.source.clone(),
            hostname: task.hostname.clone(),
            url: task.raw_url.clone(),
            ..Self::default()
        }
    }

    /// Builds a result that failed before any network I/O
    pub fn rejected(task: &TaskLine, err: &FetchError) -> Self {
        let mut print = Self::new(task);
        print.attempt.record_error(err);
        print
    }

    /// The attempt to compare against when this document is a previous scan
    ///
    /// A retry observation wins unless it was rate limited.
    pub fn effective_attempt(&self) -> &Attempt {
        if self.retry.retried && self.retry.attempt.resp.status_code != 429 {
            &self.retry.attempt
        } else {
            &self.attempt
        }
    }

    pub fn is_policy_rejection(&self) -> bool {
        self.attempt.err_kind.map_or(false, |kind| kind.is_policy())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(doc: &str) -> serde_json::Result<Self> {
        serde_json::from_str(doc)
    }
}
