//! Proxy-aware HTTP fetching with bounded retry.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};

/// How many times a transient fetch failure is retried, and how long to wait before each retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: usize,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            first_delay: Duration::from_millis(500),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retried + 1`, doubling each time up to the ceiling.
    /// `None` once the retries are used up.
    pub fn next_delay(&self, retried: usize) -> Option<Duration> {
        if retried >= self.retries {
            return None;
        }
        let factor = 1u32.checked_shl(retried as u32).unwrap_or(u32::MAX);
        Some(self.first_delay.saturating_mul(factor).min(self.ceiling))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("invalid proxy {proxy}: {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unparsable feed document from {url}: {reason}")]
    Parse { url: String, reason: String },
}

impl FetchError {
    /// Server errors, throttling, timeouts and refused connections may clear up on
    /// their own. Everything else fails the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::InvalidProxy { .. } | Self::Parse { .. } => false,
        }
    }
}

/// HTTP client pool keyed by proxy. Clients are built lazily and reused.
#[derive(Debug)]
pub struct HttpFetcher {
    config: HttpClientConfig,
    direct: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let direct = build_client(&config, None)?;
        Ok(Self {
            config,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    async fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let mut clients = self.proxied.lock().await;
        if let Some(client) = clients.get(proxy) {
            return Ok(client.clone());
        }
        let client = build_client(&self.config, Some(proxy))?;
        clients.insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    /// GET `url`, optionally through `proxy`. Transient failures are retried per the retry policy.
    pub async fn fetch_bytes(&self, url: &str, proxy: Option<&str>) -> Result<FetchedResponse, FetchError> {
        let client = self.client_for(proxy).await?;
        let span = info_span!("http_fetch", url, proxied = proxy.is_some());
        self.fetch_with_retry(&client, url).instrument(span).await
    }

    async fn fetch_with_retry(&self, client: &reqwest::Client, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut retried = 0;
        loop {
            let err = match fetch_once(client, url).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            let delay = match self.config.retry.next_delay(retried) {
                Some(delay) if err.is_transient() => delay,
                _ => return Err(err),
            };
            debug!(error = %err, retried, delay_ms = delay.as_millis() as u64, "retrying feed fetch");
            tokio::time::sleep(delay).await;
            retried += 1;
        }
    }
}

async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<FetchedResponse, FetchError> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    let final_url = resp.url().to_string();
    if !status.is_success() {
        return Err(FetchError::HttpStatus {
            status: status.as_u16(),
            url: final_url,
        });
    }
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = resp.bytes().await?.to_vec();
    Ok(FetchedResponse {
        status,
        final_url,
        content_type,
        body,
    })
}

fn build_client(config: &HttpClientConfig, proxy: Option<&str>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);
    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }
    if let Some(proxy) = proxy {
        let proxy_cfg = reqwest::Proxy::all(proxy).map_err(|source| FetchError::InvalidProxy {
            proxy: proxy.to_string(),
            source,
        })?;
        builder = builder.proxy(proxy_cfg);
    }
    builder.build().map_err(FetchError::Request)
}
