//! Live HTTP fetch client used by every provider.
//!
//! Each provider owns one [`LiveFetchClient`] bound to its website's base
//! URL. The client layers four concerns over a `reqwest::Client`:
//!
//! - **TTL cache**: responses are cached in memory keyed by absolute URL
//!   (status, headers, and body), so header-driven pagination works from
//!   cache too. The cache is LRU-bounded and expired entries are purged on
//!   every insert. A TTL of zero disables caching.
//! - **Concurrency gate**: a semaphore bounds in-flight requests per
//!   provider; callers beyond the limit wait for a permit.
//! - **Timeout**: every request carries the configured wall-clock timeout.
//! - **Observation**: each outcome, including cache hits, is reported to
//!   an optional [`FetchObserver`].
//!
//! Non-2xx responses are errors ([`FetchError::Status`]). Retrying is the
//! provider's job; this client makes exactly one attempt per call.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use reqwest::Url;
use tokio::sync::{Mutex, Semaphore};

use crate::config::Config;
use crate::error::FetchError;

/// Outcome of one fetch, reported to observers.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub provider_id: String,
    pub url: String,
    pub duration: Duration,
    pub cache_hit: bool,
    /// `None` on success.
    pub error: Option<String>,
}

/// Receives fetch outcomes (health monitoring, metrics).
pub trait FetchObserver: Send + Sync {
    fn on_fetch(&self, outcome: &FetchOutcome);
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    /// Header names are lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug)]
struct CacheEntry {
    response: FetchResponse,
    stored_at: Instant,
}

/// Most responses one client keeps before evicting the least recently used.
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

/// Settings a fetch client is built from.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    pub user_agent: String,
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            timeout: config.timeout(),
            cache_ttl: config.cache_ttl(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            user_agent: config.user_agent.clone(),
        }
    }
}

pub struct LiveFetchClient {
    provider_id: String,
    base_url: Url,
    client: reqwest::Client,
    gate: Semaphore,
    cache_ttl: Duration,
    cache: Mutex<LruCache<String, CacheEntry>>,
    observer: Option<Arc<dyn FetchObserver>>,
    closed: AtomicBool,
}

impl LiveFetchClient {
    pub fn new(
        provider_id: impl Into<String>,
        base_url: &str,
        settings: &FetchSettings,
        observer: Option<Arc<dyn FetchObserver>>,
    ) -> Result<Self, FetchError> {
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url =
            Url::parse(&normalised).map_err(|_| FetchError::InvalidUrl(base_url.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            provider_id: provider_id.into(),
            base_url,
            client,
            gate: Semaphore::new(settings.concurrency.max(1)),
            cache_ttl: settings.cache_ttl,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(settings.cache_capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            observer,
            closed: AtomicBool::new(false),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cache_enabled(&self) -> bool {
        !self.cache_ttl.is_zero()
    }

    /// Resolve `path` against the base URL and append query parameters.
    ///
    /// Absolute `http(s)://` URLs are used as-is.
    pub fn build_url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            self.base_url.join(path)
        }
        .map_err(|_| FetchError::InvalidUrl(path.to_string()))?;

        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Fetch and return the body text.
    pub async fn get_text(
        &self,
        path: &str,
        params: &[(&str, String)],
        use_cache: bool,
    ) -> Result<String, FetchError> {
        Ok(self.get_response(path, params, use_cache).await?.body)
    }

    /// Fetch and return the full response, headers included.
    pub async fn get_response(
        &self,
        path: &str,
        params: &[(&str, String)],
        use_cache: bool,
    ) -> Result<FetchResponse, FetchError> {
        if self.is_closed() {
            return Err(FetchError::Closed(self.provider_id.clone()));
        }
        let url = self.build_url(path, params)?;
        let key = url.to_string();
        let use_cache = use_cache && self.cache_enabled();

        if use_cache {
            if let Some(hit) = self.cached(&key).await {
                self.observe(&key, Duration::ZERO, true, None);
                tracing::debug!(provider = %self.provider_id, url = %key, "cache hit");
                return Ok(hit);
            }
        }

        let start = Instant::now();
        let result = self.send(url).await;
        let elapsed = start.elapsed();

        match &result {
            Ok(response) => {
                self.observe(&key, elapsed, false, None);
                tracing::debug!(
                    provider = %self.provider_id,
                    url = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "fetch ok"
                );
                if use_cache {
                    self.store(key, response.clone()).await;
                }
            }
            Err(err) => {
                self.observe(&key, elapsed, false, Some(err.to_string()));
                tracing::warn!(
                    provider = %self.provider_id,
                    url = %key,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "fetch failed"
                );
            }
        }
        result
    }

    async fn cached(&self, key: &str) -> Option<FetchResponse> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.cache_ttl => {
                Some(entry.response.clone())
            }
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    async fn store(&self, key: String, response: FetchResponse) {
        let mut cache = self.cache.lock().await;
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| entry.stored_at.elapsed() >= self.cache_ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        cache.put(
            key,
            CacheEntry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    async fn send(&self, url: Url) -> Result<FetchResponse, FetchError> {
        let key = url.to_string();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| FetchError::Closed(self.provider_id.clone()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&key, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: key,
            });
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(&key, e))?;

        Ok(FetchResponse {
            url: key,
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn observe(&self, url: &str, duration: Duration, cache_hit: bool, error: Option<String>) {
        if let Some(observer) = &self.observer {
            observer.on_fetch(&FetchOutcome {
                provider_id: self.provider_id.clone(),
                url: url.to_string(),
                duration,
                cache_hit,
                error,
            });
        }
    }

    /// Number of cached responses (entries that expired since the last insert included).
    pub async fn cache_len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Stop accepting requests and drop cached responses.
    ///
    /// Idempotent. Requests waiting for a permit fail with
    /// [`FetchError::Closed`]; requests already on the wire finish.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.gate.close();
        self.cache.lock().await.clear();
        tracing::debug!(provider = %self.provider_id, "fetch client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{Canned, MockSite};

    fn settings(ttl: u64) -> FetchSettings {
        FetchSettings {
            concurrency: 2,
            timeout: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(ttl),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            user_agent: "test".to_string(),
        }
    }

    async fn site_with_pages(count: usize) -> String {
        let site = MockSite::default();
        for n in 0..count {
            site.route(&format!("page/{}", n), Canned::json(serde_json::json!({ "n": n })));
        }
        site.start().await
    }

    #[test]
    fn build_url_joins_and_encodes() {
        let client = LiveFetchClient::new("p", "https://finances.bj", &settings(0), None).unwrap();
        let url = client
            .build_url(
                "wp-json/wp/v2/services",
                &[("search", "impôt foncier".to_string()), ("page", "2".to_string())],
            )
            .unwrap();
        assert_eq!(url.host_str(), Some("finances.bj"));
        assert_eq!(url.path(), "/wp-json/wp/v2/services");
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["search"], "impôt foncier");
        assert_eq!(pairs["page"], "2");
    }

    #[test]
    fn build_url_keeps_absolute_urls() {
        let client = LiveFetchClient::new("p", "https://a.bj/", &settings(0), None).unwrap();
        let url = client.build_url("https://b.bj/x", &[]).unwrap();
        assert_eq!(url.as_str(), "https://b.bj/x");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(LiveFetchClient::new("p", "not a url", &settings(0), None).is_err());
    }

    #[tokio::test]
    async fn closed_client_refuses_requests_and_close_is_idempotent() {
        let client = LiveFetchClient::new("p", "https://a.bj/", &settings(60), None).unwrap();
        client.close().await;
        client.close().await;
        let err = client.get_text("x", &[], true).await.unwrap_err();
        assert!(matches!(err, FetchError::Closed(_)));
    }

    #[tokio::test]
    async fn expired_responses_are_purged_on_insert() {
        let base = site_with_pages(6).await;
        let fast = FetchSettings {
            cache_ttl: Duration::from_millis(100),
            ..settings(0)
        };
        let client = LiveFetchClient::new("p", &base, &fast, None).unwrap();
        for n in 0..5 {
            client.get_text(&format!("page/{}", n), &[], true).await.unwrap();
        }
        assert_eq!(client.cache_len().await, 5);

        tokio::time::sleep(Duration::from_millis(250)).await;
        client.get_text("page/5", &[], true).await.unwrap();
        assert_eq!(client.cache_len().await, 1);
    }

    #[tokio::test]
    async fn cache_is_bounded_by_capacity() {
        let base = site_with_pages(4).await;
        let small = FetchSettings {
            cache_capacity: 2,
            ..settings(60)
        };
        let client = LiveFetchClient::new("p", &base, &small, None).unwrap();
        for n in 0..4 {
            client.get_text(&format!("page/{}", n), &[], true).await.unwrap();
        }
        assert_eq!(client.cache_len().await, 2);
    }
}
