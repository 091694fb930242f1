//! Provider for finances.bj, a WordPress site.
//!
//! Services are a custom post type (`wp-json/wp/v2/services`) classified by
//! the `type_service` taxonomy. Listing endpoints are paged; the totals come
//! back in the `X-WP-Total` and `X-WP-TotalPages` headers.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use service_public_core::models::{Category, ServiceDetails, ServiceSummary};
use service_public_core::text::normalise_whitespace;

use super::{filter_by_parent, not_found_as, scalar_text, ProviderCore};
use crate::config::Config;
use crate::error::{FetchError, ProviderError};
use crate::health::HealthMonitor;
use crate::html::{first_paragraph, html_to_text, parse_service_content};
use crate::provider::{
    standard_tools, Provider, ProviderDescriptor, SearchOptions, SearchPage, Sourced,
};
use crate::store::{read_state, write_state, SharedState};

pub const PROVIDER_ID: &str = "finances-bj";

const TAXONOMY_PATH: &str = "wp-json/wp/v2/type_service";
const SERVICES_PATH: &str = "wp-json/wp/v2/services";

const PER_PAGE_DEFAULT: usize = 20;
const PER_PAGE_MAX: usize = 100;
/// Upper bound on pages one search walks when no limit is given.
const MAX_SEARCH_PAGES: usize = 10;

const SEARCH_FIELDS: &str = "id,link,title,excerpt.rendered,content.rendered,type_service";
const DETAIL_FIELDS: &str = "id,link,title,content.rendered,excerpt.rendered,type_service,guid";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTerm {
    id: Value,
    name: Option<String>,
    description: Option<String>,
    link: Option<String>,
    parent: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Rendered {
    rendered: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPost {
    id: Value,
    link: Option<String>,
    title: Option<Rendered>,
    excerpt: Option<Rendered>,
    content: Option<Rendered>,
    type_service: Option<Vec<Value>>,
    guid: Option<Rendered>,
}

fn rendered(field: &Option<Rendered>) -> Option<&str> {
    field
        .as_ref()
        .and_then(|r| r.rendered.as_deref())
        .filter(|s| !s.trim().is_empty())
}

impl RawPost {
    fn title(&self) -> String {
        rendered(&self.title).map(html_to_text).unwrap_or_default()
    }

    fn category_ids(&self) -> Vec<String> {
        self.type_service
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(scalar_text)
            .collect()
    }

    /// First paragraph of the excerpt, falling back to the content.
    fn excerpt(&self) -> Option<String> {
        rendered(&self.excerpt)
            .or_else(|| rendered(&self.content))
            .and_then(first_paragraph)
    }
}

/// Items per page for a requested `limit`, within `[20, 100]`.
fn per_page_for(limit: Option<usize>) -> usize {
    limit
        .filter(|l| *l > 0)
        .unwrap_or(PER_PAGE_DEFAULT)
        .clamp(PER_PAGE_DEFAULT, PER_PAGE_MAX)
}

fn search_params(
    query: &str,
    options: &SearchOptions,
    per_page: usize,
    page: usize,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("search", query.to_string()),
        ("per_page", per_page.to_string()),
        ("page", page.to_string()),
        ("status", "publish".to_string()),
        ("_embed", "false".to_string()),
        ("_fields", SEARCH_FIELDS.to_string()),
    ];
    if let Some(category) = &options.category_id {
        params.push(("type_service", category.clone()));
    }
    params
}

/// WordPress answers a page past `X-WP-TotalPages` with HTTP 400.
fn is_past_last_page(err: &ProviderError) -> bool {
    matches!(
        err,
        ProviderError::Fetch(FetchError::Status { status: 400, .. })
    )
}

fn header_count(value: Option<&str>) -> Option<usize> {
    value.and_then(|v| v.trim().parse().ok())
}

pub struct FinancesProvider {
    core: ProviderCore,
}

impl FinancesProvider {
    pub fn new(
        config: &Config,
        state: SharedState,
        health: Option<Arc<HealthMonitor>>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            core: ProviderCore::new(PROVIDER_ID, &config.finances_base_url, config, state, health)?,
        })
    }

    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: PROVIDER_ID.to_string(),
            name: "Finances BJ".to_string(),
            description: "Services du Ministère de l'Économie et des Finances du Bénin"
                .to_string(),
            priority: 80,
            coverage_tags: [
                "impots",
                "taxes",
                "fiscalite",
                "douane",
                "tresor",
                "budget",
                "finances",
                "entreprise",
                "tva",
                "patente",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            supported_tools: standard_tools(),
        }
    }

    fn category_from(&self, term: RawTerm, order: usize) -> Option<Category> {
        let name = normalise_whitespace(term.name.as_deref().unwrap_or_default());
        let id = scalar_text(&term.id)?;
        if name.is_empty() {
            return None;
        }
        let description = normalise_whitespace(term.description.as_deref().unwrap_or_default());
        let parent_id = scalar_text(&term.parent).filter(|p| p != "0");
        Some(Category {
            id,
            name,
            url: term
                .link
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| self.core.fetcher.base_url().to_string()),
            provider_id: PROVIDER_ID.to_string(),
            description: (!description.is_empty()).then_some(description),
            parent_id,
            order: Some(order as i64),
        })
    }

    /// Total matches for a search, read from the first page's headers.
    async fn count_matches(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Option<usize>, ProviderError> {
        let mut params = search_params(query, options, 1, 1);
        params.retain(|(key, _)| *key != "_fields");
        params.push(("_fields", "id".to_string()));
        let (_, response) = self
            .core
            .get_json_with_response::<Value>(
                "search_services",
                SERVICES_PATH,
                &params,
                !options.refresh,
            )
            .await?;
        Ok(header_count(response.header("X-WP-Total")))
    }

    fn summary_from(post: &RawPost) -> Option<ServiceSummary> {
        let id = scalar_text(&post.id)?;
        let title = post.title();
        let link = post.link.clone().filter(|l| !l.is_empty())?;
        if title.is_empty() {
            return None;
        }
        Some(ServiceSummary {
            id,
            title,
            url: link,
            provider_id: PROVIDER_ID.to_string(),
            category_ids: post.category_ids(),
            excerpt: post.excerpt(),
            score: None,
        })
    }

    fn details_from(service_id: &str, post: RawPost) -> Result<ServiceDetails, ProviderError> {
        let title = post.title();
        let link = post
            .link
            .clone()
            .filter(|l| !l.is_empty())
            .or_else(|| rendered(&post.guid).map(str::to_string));
        let Some(link) = link.filter(|_| !title.is_empty()) else {
            return Err(ProviderError::Parse(format!(
                "incomplete service payload for '{}'",
                service_id
            )));
        };

        let content = rendered(&post.content)
            .map(parse_service_content)
            .unwrap_or_default();
        let id = scalar_text(&post.id).unwrap_or_else(|| service_id.to_string());

        let mut details = ServiceDetails::new(id, title, link, PROVIDER_ID);
        details.category_ids = post.category_ids();
        details.excerpt = post.excerpt();
        details.summary = content.summary;
        details.contacts = content.contacts;
        details.external_links = content.links;
        Ok(details)
    }
}

#[async_trait]
impl Provider for FinancesProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn initialise(&self) -> Result<(), ProviderError> {
        if self.core.mark_initialised() {
            tracing::info!(provider = PROVIDER_ID, base_url = %self.core.fetcher.base_url(), "provider initialised");
        }
        Ok(())
    }

    async fn list_categories(
        &self,
        parent_id: Option<&str>,
        refresh: bool,
    ) -> Result<Sourced<Vec<Category>>, ProviderError> {
        if !refresh {
            if let Some(cached) = self.core.cached_categories(parent_id) {
                return Ok(Sourced::cache(cached));
            }
        }

        let mut categories: Vec<Category> = Vec::new();
        let mut order = 0usize;
        let mut page = 1usize;
        loop {
            let terms: Vec<RawTerm> = self
                .core
                .get_json(
                    "list_categories",
                    TAXONOMY_PATH,
                    &[
                        ("per_page", PER_PAGE_MAX.to_string()),
                        ("page", page.to_string()),
                    ],
                    !refresh,
                )
                .await?;
            let fetched = terms.len();
            for term in terms {
                if let Some(category) = self.category_from(term, order) {
                    categories.push(category);
                }
                order += 1;
            }
            if fetched < PER_PAGE_MAX {
                break;
            }
            page += 1;
        }

        write_state(&self.core.state).update_categories(PROVIDER_ID, &categories, true);
        tracing::debug!(provider = PROVIDER_ID, count = categories.len(), pages = page, "categories refreshed");
        Ok(Sourced::live(filter_by_parent(categories, parent_id)))
    }

    async fn search_services(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Sourced<SearchPage>, ProviderError> {
        let per_page = per_page_for(options.limit);
        let wanted = options.limit.unwrap_or(usize::MAX);
        let mut current_page = options.offset / per_page + 1;
        let mut skip = options.offset % per_page;
        let mut pages_walked = 0usize;

        let mut results: Vec<ServiceSummary> = Vec::new();
        let mut total_results: Option<usize> = None;
        let mut total_pages: Option<usize> = None;

        loop {
            let params = search_params(query, options, per_page, current_page);
            let fetched = self
                .core
                .get_json_with_response::<Value>(
                    "search_services",
                    SERVICES_PATH,
                    &params,
                    !options.refresh,
                )
                .await;
            let (payload, response) = match fetched {
                Ok(fetched) => fetched,
                Err(err) if current_page > 1 && is_past_last_page(&err) => {
                    tracing::debug!(provider = PROVIDER_ID, page = current_page, "past the last result page");
                    if total_results.is_none() {
                        total_results = self.count_matches(query, options).await?;
                    }
                    break;
                }
                Err(err) => return Err(err),
            };
            pages_walked += 1;

            if total_results.is_none() {
                total_results = header_count(response.header("X-WP-Total"));
            }
            if total_pages.is_none() {
                total_pages = header_count(response.header("X-WP-TotalPages"));
            }

            let items = match payload {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let fetched = items.len();

            for item in items.into_iter().skip(skip) {
                let Ok(post) = serde_json::from_value::<RawPost>(item) else {
                    continue;
                };
                if let Some(summary) = Self::summary_from(&post) {
                    results.push(summary);
                }
                if results.len() >= wanted {
                    break;
                }
            }

            if results.len() >= wanted || fetched < per_page {
                break;
            }
            if total_pages.is_some_and(|pages| current_page >= pages) {
                break;
            }
            if pages_walked >= MAX_SEARCH_PAGES {
                tracing::debug!(provider = PROVIDER_ID, pages = pages_walked, "search page cap reached");
                break;
            }
            current_page += 1;
            skip = 0;
        }

        if !results.is_empty() {
            write_state(&self.core.state).update_services(PROVIDER_ID, &results, false);
            self.core.rebuild_index();
        }
        let total_results = total_results.unwrap_or(options.offset + results.len());
        self.core.record_search_total(total_results);

        Ok(Sourced::live(SearchPage {
            results,
            total_results,
        }))
    }

    async fn get_service_details(
        &self,
        service_id: &str,
        refresh: bool,
    ) -> Result<Sourced<ServiceDetails>, ProviderError> {
        if !refresh {
            let cached = read_state(&self.core.state)
                .get_service_details(PROVIDER_ID, service_id)
                .cloned();
            if let Some(details) = cached {
                return Ok(Sourced::cache(details));
            }
        }

        let payload: Value = self
            .core
            .get_json(
                "get_service_details",
                &format!("{}/{}", SERVICES_PATH, service_id),
                &[("_fields", DETAIL_FIELDS.to_string())],
                !refresh,
            )
            .await
            .map_err(|e| not_found_as(e, service_id))?;

        if !payload.is_object() {
            return Err(ProviderError::Parse(format!(
                "unexpected payload for service '{}'",
                service_id
            )));
        }
        let post: RawPost = serde_json::from_value(payload)?;
        let details = Self::details_from(service_id, post)?;

        {
            let mut state = write_state(&self.core.state);
            state.update_services(PROVIDER_ID, &[details.to_summary()], false);
            state.set_service_details(PROVIDER_ID, details.clone());
        }
        self.core.rebuild_index();
        Ok(Sourced::live(details))
    }

    async fn get_status(&self) -> Value {
        self.core.status().await
    }

    async fn shutdown(&self) {
        self.core.shutdown().await;
    }
}
