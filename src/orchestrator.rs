//! Aggregation and fallback across providers.
//!
//! Every logical operation walks a candidate list of providers:
//!
//! ```text
//! explicit provider_id ──► [that provider]
//! otherwise            ──► priority order (search: topical affinity first)
//!
//! for each candidate:
//!   live call ok, non-empty  ──► return it (with earlier warnings)
//!   live call ok, empty      ──► warn "<id>: no results", remember, continue
//!   live call failed         ──► warn "<id>: <error>", try catalog cache,
//!                                 return a non-empty cache hit, else continue
//! exhausted                  ──► remembered empty payload, or an error
//! ```
//!
//! Details and validation have no notion of "empty": the first success
//! wins. A provider that does not know the service ends the walk, since
//! service ids only mean something to the provider that issued them. The snapshot is persisted once per call, after the answer is
//! chosen, when any candidate reached its source live.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

use service_public_core::fuzzy::partial_ratio;
use service_public_core::models::{Category, ServiceDetails};
use service_public_core::search::ServiceSearchIndex;
use service_public_core::text::fold_accents;

use crate::error::{ProviderError, ToolError};
use crate::provider::{DataSource, Provider, ProviderDescriptor, SearchOptions, SearchPage, Sourced};
use crate::registry::ProviderRegistry;
use crate::store::{read_state, SharedState, SnapshotPersister};

/// Affinity at or above which a provider counts as topically relevant.
pub const AFFINITY_THRESHOLD: f64 = 60.0;

/// The payload an operation settled on, and how it got there.
#[derive(Debug, Clone, Serialize)]
pub struct Answer<T> {
    pub provider_id: String,
    pub source: DataSource,
    pub value: T,
    /// One entry per candidate that failed or came back empty.
    pub warnings: Vec<String>,
}

/// Best coverage-tag match for `query`, on the 0–100 scale.
pub fn topical_affinity(query: &str, descriptor: &ProviderDescriptor) -> f64 {
    let query = fold_accents(&query.to_lowercase());
    descriptor
        .coverage_tags
        .iter()
        .map(|tag| partial_ratio(&query, &fold_accents(&tag.to_lowercase())))
        .fold(0.0, f64::max)
}

/// Re-rank descriptors for a search query.
///
/// Relevant providers (affinity ≥ 60) come first; then affinity, then
/// priority, all descending. The sort is stable.
pub fn rank_for_query(query: &str, descriptors: Vec<ProviderDescriptor>) -> Vec<ProviderDescriptor> {
    let mut scored: Vec<(bool, f64, ProviderDescriptor)> = descriptors
        .into_iter()
        .map(|d| {
            let affinity = topical_affinity(query, &d);
            (affinity >= AFFINITY_THRESHOLD, affinity, d)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(b.1.total_cmp(&a.1))
            .then(b.2.priority.cmp(&a.2.priority))
    });
    scored.into_iter().map(|(_, _, d)| d).collect()
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    state: SharedState,
    persister: Option<Arc<dyn SnapshotPersister>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        state: SharedState,
        persister: Option<Arc<dyn SnapshotPersister>>,
    ) -> Self {
        Self {
            registry,
            state,
            persister,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    fn candidates(&self, provider_id: Option<&str>) -> Result<Vec<ProviderDescriptor>, ToolError> {
        match provider_id {
            Some(id) => {
                let descriptor = self
                    .registry
                    .get_descriptor(id)
                    .map_err(|_| ToolError::ProviderNotRegistered(id.to_string()))?;
                Ok(vec![descriptor.clone()])
            }
            None => Ok(self.registry.ordered_descriptors()),
        }
    }

    pub async fn list_categories(
        &self,
        provider_id: Option<&str>,
        parent_id: Option<&str>,
        refresh: bool,
    ) -> Result<Answer<Vec<Category>>, ToolError> {
        let candidates = self.candidates(provider_id)?;
        self.aggregate(
            "categories",
            candidates,
            provider_id.is_some(),
            move |provider| async move { provider.list_categories(parent_id, refresh).await },
            |categories: &Vec<Category>| categories.is_empty(),
            |id| {
                let state = read_state(&self.state);
                match parent_id {
                    None => state
                        .catalog(id)
                        .map(|c| c.categories().values().cloned().collect())
                        .unwrap_or_default(),
                    Some(parent) => state.categories_for_parent(id, Some(parent)),
                }
            },
        )
        .await
    }

    pub async fn search_services(
        &self,
        query: &str,
        provider_id: Option<&str>,
        options: &SearchOptions,
    ) -> Result<Answer<SearchPage>, ToolError> {
        let candidates = match provider_id {
            Some(_) => self.candidates(provider_id)?,
            None => rank_for_query(query, self.registry.ordered_descriptors()),
        };
        tracing::debug!(
            query,
            order = ?candidates.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "search candidates"
        );
        self.aggregate(
            "results",
            candidates,
            provider_id.is_some(),
            move |provider| async move { provider.search_services(query, options).await },
            |page: &SearchPage| page.results.is_empty(),
            |id| self.cached_search(id, query, options),
        )
        .await
    }

    /// Search a provider's catalog through a freshly built index.
    fn cached_search(&self, provider_id: &str, query: &str, options: &SearchOptions) -> SearchPage {
        let state = read_state(&self.state);
        let Some(catalog) = state.catalog(provider_id) else {
            return SearchPage::default();
        };
        let index = ServiceSearchIndex::from_catalog(catalog);
        let matches: Vec<_> = index
            .search(catalog, query, usize::MAX)
            .into_iter()
            .filter(|s| match &options.category_id {
                Some(category) => s.category_ids.iter().any(|c| c == category),
                None => true,
            })
            .collect();
        let total_results = matches.len();
        SearchPage {
            results: matches
                .into_iter()
                .skip(options.offset)
                .take(options.limit.unwrap_or(usize::MAX))
                .collect(),
            total_results,
        }
    }

    pub async fn get_service_details(
        &self,
        service_id: &str,
        provider_id: Option<&str>,
        refresh: bool,
    ) -> Result<Answer<ServiceDetails>, ToolError> {
        let candidates = self.candidates(provider_id)?;
        self.aggregate_first(
            "service details",
            candidates,
            provider_id.is_some(),
            move |provider| async move { provider.get_service_details(service_id, refresh).await },
            true,
            service_id,
        )
        .await
    }

    pub async fn validate_service(
        &self,
        service_id: &str,
        provider_id: Option<&str>,
    ) -> Result<Answer<ServiceDetails>, ToolError> {
        let candidates = self.candidates(provider_id)?;
        self.aggregate_first(
            "a validated service",
            candidates,
            provider_id.is_some(),
            move |provider| async move { provider.validate_service(service_id).await },
            false,
            service_id,
        )
        .await
    }

    /// Status of every provider (or just `provider_id`), gathered concurrently.
    pub async fn scraper_status(&self, provider_id: Option<&str>) -> Result<Value, ToolError> {
        let candidates = self.candidates(provider_id)?;
        let mut providers: Vec<(ProviderDescriptor, Arc<dyn Provider>)> = Vec::new();
        for descriptor in candidates {
            let provider = self.registry.get(&descriptor.id)?;
            providers.push((descriptor, provider));
        }

        let statuses = join_all(providers.iter().map(|(_, p)| p.get_status())).await;

        let entries: Vec<Value> = providers
            .iter()
            .zip(statuses)
            .map(|((descriptor, _), status)| {
                let (categories, services) = {
                    let state = read_state(&self.state);
                    state
                        .catalog(&descriptor.id)
                        .map(|c| (c.categories().len(), c.services().len()))
                        .unwrap_or((0, 0))
                };
                json!({
                    "provider_id": descriptor.id,
                    "status": status,
                    "registry": {
                        "categories_indexed": categories,
                        "services_indexed": services,
                    },
                    "descriptor": descriptor,
                })
            })
            .collect();

        Ok(json!({ "providers": entries }))
    }

    /// Descriptors in priority order.
    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.ordered_descriptors()
    }

    /// Candidate loop for operations where an empty payload means "try the next".
    async fn aggregate<T, F, Fut>(
        &self,
        what: &str,
        candidates: Vec<ProviderDescriptor>,
        explicit: bool,
        mut call: F,
        is_empty: impl Fn(&T) -> bool,
        cached: impl Fn(&str) -> T,
    ) -> Result<Answer<T>, ToolError>
    where
        F: FnMut(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<Sourced<T>, ProviderError>>,
    {
        let mut warnings: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut last_error: Option<(String, ProviderError)> = None;
        let mut remembered: Option<(String, Sourced<T>)> = None;
        let mut any_live = false;
        let mut winner: Option<(String, Sourced<T>)> = None;

        for descriptor in candidates {
            let id = descriptor.id;
            let provider = self.registry.get(&id)?;
            match call(provider).await {
                Ok(sourced) => {
                    any_live |= sourced.is_live();
                    if !is_empty(&sourced.value) {
                        winner = Some((id, sourced));
                        break;
                    }
                    tracing::info!(provider = %id, what, "provider returned nothing");
                    warnings.push(format!("{}: no results", id));
                    remembered = Some((id, sourced));
                }
                Err(err) => {
                    tracing::warn!(provider = %id, what, error = %err, "provider failed");
                    warnings.push(format!("{}: {}", id, err));
                    let fallback = cached(&id);
                    if !is_empty(&fallback) {
                        tracing::info!(provider = %id, what, "serving from catalog cache");
                        winner = Some((id, Sourced::cache(fallback)));
                        break;
                    }
                    failed.push(id.clone());
                    last_error = Some((id, err));
                }
            }
        }

        let chosen = winner.or(remembered);
        self.settle(what, chosen, warnings, failed, last_error, explicit, any_live)
            .await
    }

    /// Candidate loop for details/validate: first success wins.
    async fn aggregate_first<F, Fut>(
        &self,
        what: &str,
        candidates: Vec<ProviderDescriptor>,
        explicit: bool,
        mut call: F,
        cache_fallback: bool,
        service_id: &str,
    ) -> Result<Answer<ServiceDetails>, ToolError>
    where
        F: FnMut(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = Result<Sourced<ServiceDetails>, ProviderError>>,
    {
        let mut warnings: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut last_error: Option<(String, ProviderError)> = None;
        let mut any_live = false;
        let mut winner: Option<(String, Sourced<ServiceDetails>)> = None;
        let mut unknown = false;

        for descriptor in candidates {
            let id = descriptor.id;
            let provider = self.registry.get(&id)?;
            match call(provider).await {
                Ok(sourced) => {
                    any_live |= sourced.is_live();
                    winner = Some((id, sourced));
                    break;
                }
                Err(err) => {
                    unknown = err.is_not_found();
                    if unknown {
                        tracing::info!(provider = %id, service_id, "service unknown to provider");
                    } else {
                        tracing::warn!(provider = %id, service_id, error = %err, "provider failed");
                    }
                    warnings.push(format!("{}: {}", id, err));
                    if cache_fallback {
                        let cached = read_state(&self.state)
                            .get_service_details(&id, service_id)
                            .cloned();
                        if let Some(details) = cached {
                            winner = Some((id, Sourced::cache(details)));
                            break;
                        }
                    }
                    failed.push(id.clone());
                    last_error = Some((id, err));
                    // Service ids are provider-scoped; another provider's
                    // record under the same id is a different service.
                    if unknown {
                        break;
                    }
                }
            }
        }

        let surface_last = explicit || unknown;
        self.settle(what, winner, warnings, failed, last_error, surface_last, any_live)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn settle<T>(
        &self,
        what: &str,
        chosen: Option<(String, Sourced<T>)>,
        mut warnings: Vec<String>,
        failed: Vec<String>,
        last_error: Option<(String, ProviderError)>,
        surface_last: bool,
        any_live: bool,
    ) -> Result<Answer<T>, ToolError> {
        if any_live {
            if let Some(persister) = &self.persister {
                if let Err(err) = persister.persist().await {
                    tracing::error!(error = %err, "failed to persist registry snapshot");
                    warnings.push(format!("persistence: {}", err));
                }
            }
        }

        if let Some((provider_id, sourced)) = chosen {
            return Ok(Answer {
                provider_id,
                source: sourced.source,
                value: sourced.value,
                warnings,
            });
        }

        if surface_last {
            if let Some((provider_id, source)) = last_error {
                return Err(ToolError::ProviderOperation {
                    provider_id,
                    source,
                });
            }
        }

        let message = if failed.is_empty() && warnings.is_empty() {
            "No providers registered".to_string()
        } else {
            format!(
                "No providers returned {} (failed: {}): {}",
                what,
                failed.join(", "),
                warnings.join("; ")
            )
        };
        Err(ToolError::ProviderAggregateFailure { message, warnings })
    }
}
