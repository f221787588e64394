//! Response summarisation and redirect bookkeeping

use crate::state::{DstChange, RedirectHop, ResponseSummary};
use crate::{FetchError, FetchResult};
use hyper::header::{HeaderMap, ETAG, LOCATION};
use hyper::StatusCode;
use std::collections::BTreeMap;
use url::Url;

/// Status codes whose `Location` is followed
pub fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// Resolves the `Location` header against the URL that produced it
///
/// # Returns
///
/// * `Ok(Some(Url))` - Absolute redirect target
/// * `Ok(None)` - No usable `Location` header
/// * `Err(FetchError::Http)` - The header could not be joined onto `base`
pub fn redirect_location(base: &Url, headers: &HeaderMap) -> FetchResult<Option<Url>> {
    let location = match headers.get(LOCATION).and_then(|v| v.to_str().ok()) {
        Some(location) if !location.trim().is_empty() => location.trim(),
        _ => return Ok(None),
    };
    base.join(location)
        .map(Some)
        .map_err(|e| FetchError::Http(format!("bad redirect location '{}': {}", location, e)))
}

/// Builds the stored summary of the final response
pub fn summarize(
    status: StatusCode,
    headers: &HeaderMap,
    self_hash: String,
    size: usize,
) -> ResponseSummary {
    let mut flattened: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flattened
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
        .unwrap_or_default();

    ResponseSummary {
        status_code: i32::from(status.as_u16()),
        headers: flattened,
        etag,
        self_hash,
        size,
    }
}

/// Compares the requested URL with the last redirect target
pub fn destination_change(original: &Url, chain: &[RedirectHop]) -> DstChange {
    let Some(last) = chain.last() else {
        return DstChange::default();
    };
    let Ok(dst) = Url::parse(&last.location) else {
        return DstChange::default();
    };

    DstChange {
        scheme: original.scheme() != dst.scheme(),
        hostname: original.host_str() != dst.host_str(),
        path: original.path() != dst.path(),
        query: original.query() != dst.query(),
    }
}
