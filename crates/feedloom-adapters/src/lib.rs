//! Source adapter contracts: fetch a subscription's document, parse it, normalize its items.

use async_trait::async_trait;
use feedloom_storage::{FetchError, HttpFetcher};
use tracing::debug;

pub mod normalize;
pub mod parse;

pub use normalize::{normalize_document, normalize_item, resolve_guid, Trim};
pub use parse::{parse_feed, FeedParseError, RawEnclosure, RawFeedDocument, RawItem};

pub const CRATE_NAME: &str = "feedloom-adapters";

/// Source fetch collaborator. Network and parse failures both surface as [`FetchError`].
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<RawFeedDocument, FetchError>;
}

pub struct HttpFeedSource {
    http: HttpFetcher,
}

impl HttpFeedSource {
    pub fn new(http: HttpFetcher) -> Self {
        Self { http }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str, proxy: Option<&str>) -> Result<RawFeedDocument, FetchError> {
        let response = self.http.fetch_bytes(url, proxy).await?;
        debug!(
            url,
            bytes = response.body.len(),
            content_type = response.content_type.as_deref().unwrap_or("unknown"),
            "fetched feed document"
        );
        parse_feed(&response.body).map_err(|err| FetchError::Parse {
            url: response.final_url,
            reason: err.to_string(),
        })
    }
}
