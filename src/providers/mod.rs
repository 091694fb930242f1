//! Built-in providers and the plumbing they share.
//!
//! | Provider | Source |
//! |----------|--------|
//! | [`ServicePublicProvider`] | service-public.bj portal JSON API |
//! | [`FinancesProvider`] | finances.bj WordPress REST API |

pub mod finances;
pub mod service_public;

pub use finances::FinancesProvider;
pub use service_public::ServicePublicProvider;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use service_public_core::models::Category;
use service_public_core::search::ServiceSearchIndex;

use crate::config::Config;
use crate::error::ProviderError;
use crate::fetch::{FetchObserver, FetchResponse, FetchSettings, LiveFetchClient};
use crate::health::HealthMonitor;
use crate::provider::RetryPolicy;
use crate::store::{read_state, SharedState};

/// State and helpers common to every HTTP-backed provider.
pub(crate) struct ProviderCore {
    pub id: &'static str,
    pub state: SharedState,
    pub fetcher: LiveFetchClient,
    pub retry: RetryPolicy,
    concurrency: usize,
    cache_ttl_seconds: u64,
    health: Option<Arc<HealthMonitor>>,
    index: RwLock<ServiceSearchIndex>,
    initialised: AtomicBool,
    last_search_total: AtomicUsize,
}

impl ProviderCore {
    pub fn new(
        id: &'static str,
        base_url: &str,
        config: &Config,
        state: SharedState,
        health: Option<Arc<HealthMonitor>>,
    ) -> Result<Self, ProviderError> {
        let observer = health
            .clone()
            .map(|monitor| monitor as Arc<dyn FetchObserver>);
        let fetcher =
            LiveFetchClient::new(id, base_url, &FetchSettings::from_config(config), observer)
                .map_err(|e| ProviderError::Initialisation(format!("{}: {}", id, e)))?;
        let core = Self {
            id,
            state,
            fetcher,
            retry: RetryPolicy::from_config(config),
            concurrency: config.concurrency,
            cache_ttl_seconds: config.cache_ttl_seconds,
            health,
            index: RwLock::new(ServiceSearchIndex::new()),
            initialised: AtomicBool::new(false),
            last_search_total: AtomicUsize::new(0),
        };
        core.rebuild_index();
        Ok(core)
    }

    /// Mark initialised; returns `false` if it already was.
    pub fn mark_initialised(&self) -> bool {
        !self.initialised.swap(true, Ordering::SeqCst)
    }

    pub fn record_search_total(&self, total: usize) {
        self.last_search_total.store(total, Ordering::SeqCst);
    }

    /// Base URL without its trailing slash, for building public page links.
    pub fn public_base(&self) -> String {
        self.fetcher
            .base_url()
            .as_str()
            .trim_end_matches('/')
            .to_string()
    }

    /// GET and decode JSON, retrying transient failures.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        params: &[(&str, String)],
        use_cache: bool,
    ) -> Result<T, ProviderError> {
        crate::provider::with_retry(self.retry, self.id, operation, move || async move {
            let body = self.fetcher.get_text(path, params, use_cache).await?;
            Ok::<T, ProviderError>(serde_json::from_str(&body)?)
        })
        .await
    }

    /// GET returning the decoded body plus the raw response for headers.
    pub async fn get_json_with_response<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        params: &[(&str, String)],
        use_cache: bool,
    ) -> Result<(T, FetchResponse), ProviderError> {
        crate::provider::with_retry(self.retry, self.id, operation, move || async move {
            let response = self.fetcher.get_response(path, params, use_cache).await?;
            let decoded: T = serde_json::from_str(&response.body)?;
            Ok::<_, ProviderError>((decoded, response))
        })
        .await
    }

    /// Catalog categories when the catalog holds any, filtered by parent.
    pub fn cached_categories(&self, parent_id: Option<&str>) -> Option<Vec<Category>> {
        let state = read_state(&self.state);
        let catalog = state.catalog(self.id)?;
        if catalog.categories().is_empty() {
            return None;
        }
        Some(filter_by_parent(
            catalog.categories().values().cloned().collect(),
            parent_id,
        ))
    }

    /// Re-tokenize the catalog into a fresh index and swap it in.
    pub fn rebuild_index(&self) {
        let fresh = {
            let state = read_state(&self.state);
            state
                .catalog(self.id)
                .map(ServiceSearchIndex::from_catalog)
                .unwrap_or_default()
        };
        *self
            .index
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
    }

    pub fn indexed_services(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub async fn status(&self) -> Value {
        let (categories, services, details) = {
            let state = read_state(&self.state);
            state
                .catalog(self.id)
                .map(|c| {
                    (
                        c.categories().len(),
                        c.services().len(),
                        c.service_details_map().len(),
                    )
                })
                .unwrap_or((0, 0, 0))
        };
        let mut status = json!({
            "provider_id": self.id,
            "base_url": self.fetcher.base_url().as_str(),
            "concurrency": self.concurrency,
            "cache_ttl": self.cache_ttl_seconds,
            "initialised": self.initialised.load(Ordering::SeqCst),
            "closed": self.fetcher.is_closed(),
            "cached_responses": self.fetcher.cache_len().await,
            "indexed_services": self.indexed_services(),
            "last_search_total": self.last_search_total.load(Ordering::SeqCst),
            "catalog": {
                "categories": categories,
                "services": services,
                "service_details": details,
            },
        });
        if let Some(health) = &self.health {
            status["health"] = serde_json::to_value(health.summary()).unwrap_or(Value::Null);
        }
        status
    }

    pub async fn shutdown(&self) {
        self.fetcher.close().await;
    }
}

/// `None` keeps every category; `Some(id)` keeps that id's children.
pub(crate) fn filter_by_parent(categories: Vec<Category>, parent_id: Option<&str>) -> Vec<Category> {
    match parent_id {
        None => categories,
        Some(parent) => categories
            .into_iter()
            .filter(|c| c.parent_id.as_deref() == Some(parent))
            .collect(),
    }
}

/// Turn an upstream 404 into [`ProviderError::NotFound`] for `service_id`.
pub(crate) fn not_found_as(err: ProviderError, service_id: &str) -> ProviderError {
    match err {
        ProviderError::Fetch(fetch) if fetch.is_not_found() => {
            ProviderError::NotFound(service_id.to_string())
        }
        other => other,
    }
}

/// Text of a string or numeric JSON scalar; ids arrive as either.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-in for the upstream websites.

    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;

    /// A canned response keyed by request path.
    #[derive(Clone)]
    pub struct Canned {
        pub status: u16,
        pub body: String,
        pub headers: Vec<(String, String)>,
    }

    impl Canned {
        pub fn json(body: serde_json::Value) -> Self {
            Self {
                status: 200,
                body: body.to_string(),
                headers: Vec::new(),
            }
        }

        pub fn status(status: u16) -> Self {
            Self {
                status,
                body: String::new(),
                headers: Vec::new(),
            }
        }

        pub fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.push((name.to_string(), value.to_string()));
            self
        }
    }

    #[derive(Clone, Default)]
    pub struct MockSite {
        routes: Arc<Mutex<HashMap<String, Canned>>>,
        /// Every request as `(path, query params)`.
        pub requests: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    }

    impl MockSite {
        pub fn route(&self, path: &str, canned: Canned) {
            self.routes
                .lock()
                .unwrap()
                .insert(path.trim_matches('/').to_string(), canned);
        }

        /// Like [`MockSite::route`], but only for requests with `?page=<page>`.
        pub fn route_page(&self, path: &str, page: usize, canned: Canned) {
            self.routes
                .lock()
                .unwrap()
                .insert(format!("{}?page={}", path.trim_matches('/'), page), canned);
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// Serve on an ephemeral port; returns the base URL.
        pub async fn start(&self) -> String {
            let app = Router::new()
                .route("/{*path}", get(handle))
                .with_state(self.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{}/", addr)
        }
    }

    async fn handle(
        State(site): State<MockSite>,
        Path(path): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> Response {
        let key = path.trim_matches('/').to_string();
        let paged = params.get("page").map(|page| format!("{}?page={}", key, page));
        site.requests
            .lock()
            .unwrap()
            .push((path.clone(), params));
        let canned = {
            let routes = site.routes.lock().unwrap();
            paged
                .and_then(|paged| routes.get(&paged).cloned())
                .or_else(|| routes.get(&key).cloned())
        };
        match canned {
            Some(canned) => {
                let mut headers = HeaderMap::new();
                headers.insert("content-type", "application/json".parse().unwrap());
                for (name, value) in &canned.headers {
                    headers.insert(
                        axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        value.parse().unwrap(),
                    );
                }
                let status = StatusCode::from_u16(canned.status).unwrap();
                (status, headers, canned.body).into_response()
            }
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    pub fn test_config(base_url: &str) -> crate::config::Config {
        crate::config::Config {
            base_url: base_url.to_string(),
            finances_base_url: base_url.to_string(),
            retry_base_delay_ms: 0,
            ..crate::config::Config::default()
        }
    }
}
