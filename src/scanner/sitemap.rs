//! Sitemap capture
//!
//! Fetches a hostname's `/sitemap.xml` once per scan and stores the listed
//! locations. Failures are logged and otherwise ignored.

use crate::scanner::scheduler::HostUnit;
use crate::scanner::ScanContext;
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::io::Cursor;
use std::sync::Arc;

pub async fn capture(ctx: Arc<ScanContext>, host: Arc<HostUnit>) {
    let sitemap_url = format!(
        "{}://{}/sitemap.xml",
        ctx.config.scan.health_check_scheme,
        host.authority()
    );

    let body = match ctx.client.get(&sitemap_url).send().await {
        Ok(response) if response.status().is_success() => match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!("Sitemap body for {} unreadable: {}", sitemap_url, e);
                return;
            }
        },
        Ok(response) => {
            tracing::debug!("Sitemap {} returned {}", sitemap_url, response.status());
            return;
        }
        Err(e) => {
            tracing::debug!("Sitemap fetch failed for {}: {}", sitemap_url, e);
            return;
        }
    };

    let locations = parse_sitemap(&body);
    if locations.is_empty() {
        return;
    }

    let store = Arc::clone(&ctx.sitemaps);
    let hostname = host.hostname.clone();
    let url = sitemap_url.clone();
    match tokio::task::spawn_blocking(move || store.insert_sitemap(&hostname, &url, &locations))
        .await
    {
        Ok(Ok(count)) => tracing::debug!("Stored {} sitemap locations from {}", count, sitemap_url),
        Ok(Err(e)) => tracing::warn!("Failed to store sitemap {}: {}", sitemap_url, e),
        Err(e) => tracing::warn!("Sitemap store task failed: {}", e),
    }
}

/// `<loc>` values of URL entries and nested sitemap entries
///
/// Reading stops at the first XML error.
pub fn parse_sitemap(xml: &[u8]) -> Vec<String> {
    SiteMapReader::new(Cursor::new(xml))
        .take_while(|entity| !matches!(entity, SiteMapEntity::Err(_)))
        .filter_map(|entity| match entity {
            SiteMapEntity::Url(entry) => entry.loc.get_url(),
            SiteMapEntity::SiteMap(entry) => entry.loc.get_url(),
            _ => None,
        })
        .map(|url| url.to_string())
        .collect()
}
