//! Concurrent subscription fetching.
//!
//! Sources are fetched in parallel, each under its own timeout. A failed,
//! slow or cancelled source turns into a [`SourcePayload`] whose body is the
//! failure reason, so the pipeline carries on with partial results.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::pipeline::SourcePayload;

/// Connect timeout for subscription requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A subscription to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    pub prefix: String,
}

/// Retrieves the raw body of a subscription URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> anyhow::Result<String>;
}

/// HTTP fetcher with a short-lived response cache.
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (String, Instant)>>,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration, cache_ttl: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build subscription HTTP client: {e}"))?;
        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, url: &str) -> Option<String> {
        let mut cache = self.cache.lock();
        match cache.get(url) {
            Some((body, expires)) if *expires > Instant::now() => Some(body.clone()),
            Some(_) => {
                cache.remove(url);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        if let Some(body) = self.cached(url) {
            tracing::debug!("cache hit: {url}");
            return Ok(body);
        }

        let resp = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!("subscription fetch timed out: {url}")
                } else if e.is_connect() {
                    anyhow::anyhow!("failed to connect to subscription URL: {url}: {e}")
                } else {
                    anyhow::anyhow!("subscription fetch failed: {url}: {e}")
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("subscription returned HTTP {status}: {url}");
        }

        let body = resp
            .text()
            .await
            .map_err(|e| anyhow::anyhow!("failed to read subscription response body: {e}"))?;

        if !self.cache_ttl.is_zero() {
            self.cache
                .lock()
                .insert(url.to_string(), (body.clone(), Instant::now() + self.cache_ttl));
        }
        Ok(body)
    }
}

/// Fetch every source concurrently.
///
/// The result has one payload per source, in declaration order, whatever
/// order the fetches finished in.
pub async fn fetch_all(
    sources: &[SourceSpec],
    fetcher: &dyn SourceFetcher,
    timeout: Duration,
    token: &CancellationToken,
) -> Vec<SourcePayload> {
    let futures = sources.iter().enumerate().map(|(index, source)| async move {
        let body = tokio::select! {
            () = token.cancelled() => Err("cancelled".to_string()),
            res = tokio::time::timeout(timeout, fetcher.fetch(&source.url)) => match res {
                Ok(Ok(body)) => Ok(body),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f32())),
            },
        };
        if let Err(reason) = &body {
            tracing::warn!("fetch '{}' failed: {reason}", source.name);
        }
        SourcePayload {
            name: source.name.clone(),
            prefix: source.prefix.clone(),
            index,
            body,
        }
    });
    futures_util::future::join_all(futures).await
}
