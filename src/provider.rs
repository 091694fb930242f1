//! Provider capability contract.
//!
//! A [`Provider`] is one data source (one website). Every provider
//! offers the same operations, and every data-returning operation says
//! where its answer came from through [`Sourced`]:
//!
//! ```text
//! list_categories     → Sourced<Vec<Category>>
//! search_services     → Sourced<SearchPage>
//! get_service_details → Sourced<ServiceDetails>
//! validate_service    → Sourced<ServiceDetails>   (default: details with refresh)
//! get_status          → serde_json::Value         (never fails)
//! ```
//!
//! Providers read and write catalog data through the shared
//! [`RegistryState`](service_public_core::catalog::RegistryState); they
//! keep no catalog data of their own.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use service_public_core::models::{Category, ServiceDetails, ServiceSummary};

use crate::config::Config;
use crate::error::ProviderError;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Live,
    Cache,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Live => "live",
            DataSource::Cache => "cache",
        }
    }
}

/// A payload tagged with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn live(value: T) -> Self {
        Self {
            value,
            source: DataSource::Live,
        }
    }

    pub fn cache(value: T) -> Self {
        Self {
            value,
            source: DataSource::Cache,
        }
    }

    pub fn is_live(&self) -> bool {
        self.source == DataSource::Live
    }
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    pub results: Vec<ServiceSummary>,
    /// Total matches reported by the source, across all pages.
    pub total_results: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub category_id: Option<String>,
    /// `None` means every available result, bounded by the provider.
    pub limit: Option<usize>,
    /// Zero-based, applied after the category filter.
    pub offset: usize,
    pub refresh: bool,
}

/// Immutable provider metadata used for routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Higher is preferred.
    pub priority: i64,
    /// Topical keywords matched against search queries.
    pub coverage_tags: Vec<String>,
    pub supported_tools: Vec<String>,
}

impl ProviderDescriptor {
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Tool names every built-in provider supports.
pub fn standard_tools() -> Vec<String> {
    [
        "list_categories",
        "search_services",
        "get_service_details",
        "validate_service",
        "get_scraper_status",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Idempotent setup, called once before serving.
    async fn initialise(&self) -> Result<(), ProviderError>;

    /// Categories under `parent_id`, or every category when `None`.
    ///
    /// Without `refresh`, a populated catalog is served as-is.
    async fn list_categories(
        &self,
        parent_id: Option<&str>,
        refresh: bool,
    ) -> Result<Sourced<Vec<Category>>, ProviderError>;

    async fn search_services(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Sourced<SearchPage>, ProviderError>;

    /// Fails with [`ProviderError::NotFound`] when the source does not know
    /// `service_id`.
    async fn get_service_details(
        &self,
        service_id: &str,
        refresh: bool,
    ) -> Result<Sourced<ServiceDetails>, ProviderError>;

    async fn validate_service(
        &self,
        service_id: &str,
    ) -> Result<Sourced<ServiceDetails>, ProviderError> {
        self.get_service_details(service_id, true).await
    }

    /// Best-effort diagnostics.
    async fn get_status(&self) -> Value;

    /// Release network resources. Idempotent, safe without `initialise`.
    async fn shutdown(&self);
}

/// Backoff for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub base_delay: Duration,
}

const MAX_RETRY_DELAY: Duration = Duration::from_secs(8);

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at eight seconds.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(MAX_RETRY_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, fails non-transiently, or attempts run out.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    provider_id: &str,
    operation: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    provider = %provider_id,
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
