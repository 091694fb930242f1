//! Provider for the service-public.bj portal.
//!
//! The portal exposes three JSON endpoints under `api/portal/publicservices`:
//!
//! ```text
//! GET …/?categories=true        → {"categories": ["Affaires", …]}
//! GET …/search?query=<q>        → {"services": [{id, name, description, categories}]}
//! GET …/<service_id>            → full service record
//! ```
//!
//! Category ids are slugs of the category names. Service pages live at
//! `<base>/public/services/service/<id>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use service_public_core::catalog::SelectorProfile;
use service_public_core::models::{
    Category, ContactPoint, DocumentLink, Requirement, ServiceDetails, ServiceSummary, Step,
};
use service_public_core::text::{normalise_whitespace, slugify};

use super::{filter_by_parent, not_found_as, scalar_text, ProviderCore};
use crate::config::Config;
use crate::error::ProviderError;
use crate::health::HealthMonitor;
use crate::provider::{
    standard_tools, Provider, ProviderDescriptor, SearchOptions, SearchPage, Sourced,
};
use crate::store::{read_state, write_state, SharedState};

pub const PROVIDER_ID: &str = "service-public-bj";

const CATEGORIES_PATH: &str = "api/portal/publicservices/";
const SEARCH_PATH: &str = "api/portal/publicservices/search";
const FORM_FILES_BASE: &str = "https://catis.xroad.bj//publicservices";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoriesPayload {
    categories: Option<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchPayload {
    services: Option<Vec<RawService>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawService {
    id: Value,
    name: Option<String>,
    description: Option<String>,
    categories: Option<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailPayload {
    name: Option<String>,
    overview: Option<Overview>,
    #[serde(rename = "mService")]
    m_service: Option<MService>,
    files: Option<Files>,
    #[serde(rename = "mServiceForms")]
    service_forms: Option<Vec<ServiceForm>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Overview {
    description: Option<String>,
    #[serde(rename = "activationDate")]
    activation_date: Option<String>,
    #[serde(rename = "thematicArea")]
    thematic_area: Option<Vec<Option<String>>>,
    #[serde(rename = "Channelssp")]
    channels: Option<Vec<Value>>,
    #[serde(rename = "ownedBy")]
    owned_by: Option<Owner>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Owner {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MService {
    #[serde(rename = "mActivationDate")]
    activation_date: Option<String>,
    #[serde(rename = "mDocuments")]
    documents: Option<String>,
    #[serde(rename = "mProcess")]
    process: Option<String>,
    fee: Option<Value>,
    #[serde(rename = "delayTime")]
    delay_time: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Files {
    forms: Option<Vec<Form>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Form {
    name: Option<String>,
    formname: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServiceForm {
    formfile: Option<String>,
    formname: Option<String>,
}

pub struct ServicePublicProvider {
    core: ProviderCore,
}

impl ServicePublicProvider {
    pub fn new(
        config: &Config,
        state: SharedState,
        health: Option<Arc<HealthMonitor>>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            core: ProviderCore::new(PROVIDER_ID, &config.base_url, config, state, health)?,
        })
    }

    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: PROVIDER_ID.to_string(),
            name: "Service Public BJ".to_string(),
            description: "Portail national des services publics du Bénin".to_string(),
            priority: 100,
            coverage_tags: [
                "identite",
                "etat civil",
                "passeport",
                "justice",
                "education",
                "sante",
                "emploi",
                "transport",
                "citoyennete",
                "administration",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            supported_tools: standard_tools(),
        }
    }

    fn category_url(&self, slug: &str) -> String {
        format!("{}/public/services?category={}", self.core.public_base(), slug)
    }

    fn service_url(&self, service_id: &str) -> String {
        format!("{}/public/services/service/{}", self.core.public_base(), service_id)
    }

    fn service_path(service_id: &str) -> String {
        format!("api/portal/publicservices/{}", service_id)
    }

    fn slugs(names: Option<Vec<Option<String>>>) -> Vec<String> {
        names
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter(|name| !name.trim().is_empty())
            .map(|name| slugify(&normalise_whitespace(&name)))
            .collect()
    }

    fn summary_from(&self, raw: RawService) -> Option<ServiceSummary> {
        let id = scalar_text(&raw.id)?;
        let title = normalise_whitespace(raw.name.as_deref().unwrap_or_default());
        if title.is_empty() {
            return None;
        }
        let excerpt = normalise_whitespace(raw.description.as_deref().unwrap_or_default());
        Some(ServiceSummary {
            url: self.service_url(&id),
            id,
            title,
            provider_id: PROVIDER_ID.to_string(),
            category_ids: Self::slugs(raw.categories),
            excerpt: (!excerpt.is_empty()).then_some(excerpt),
            score: None,
        })
    }

    fn details_from(&self, service_id: &str, payload: DetailPayload) -> Result<ServiceDetails, ProviderError> {
        let title = normalise_whitespace(payload.name.as_deref().unwrap_or_default());
        if title.is_empty() {
            return Err(ProviderError::Parse(format!(
                "unable to extract title for service '{}'",
                service_id
            )));
        }

        let overview = payload.overview.unwrap_or_default();
        let m_service = payload.m_service.unwrap_or_default();

        let last_updated = m_service
            .activation_date
            .as_deref()
            .or(overview.activation_date.as_deref())
            .and_then(parse_timestamp);

        let mut documents = Vec::new();
        let forms = payload.files.and_then(|f| f.forms).unwrap_or_default();
        for form in forms {
            let name = normalise_whitespace(&form.name.or(form.formname).unwrap_or_default());
            if name.is_empty() {
                continue;
            }
            if let Some(url) = form.url.filter(|u| !u.is_empty()) {
                documents.push(DocumentLink {
                    title: name,
                    url: Some(url),
                    document_type: Some("Formulaire".to_string()),
                });
            }
        }
        for form in payload.service_forms.unwrap_or_default() {
            let Some(file_id) = form.formfile.filter(|f| !f.is_empty()) else {
                continue;
            };
            let title = form
                .formname
                .map(|n| normalise_whitespace(&n))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| file_id.clone());
            documents.push(DocumentLink {
                title,
                url: Some(format!("{}/{}/files/{}", FORM_FILES_BASE, service_id, file_id)),
                document_type: Some("Formulaire".to_string()),
            });
        }

        let requirements = m_service
            .documents
            .as_deref()
            .unwrap_or_default()
            .split('\n')
            .map(|line| line.trim().trim_start_matches('*').trim())
            .filter(|line| !line.is_empty())
            .map(|line| Requirement {
                title: line.to_string(),
                content: None,
            })
            .collect();

        let steps = m_service
            .process
            .as_deref()
            .unwrap_or_default()
            .split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .enumerate()
            .map(|(i, block)| Step {
                title: format!("Étape {}", i + 1),
                content: block.to_string(),
            })
            .collect();

        let mut contacts: Vec<ContactPoint> = overview
            .channels
            .unwrap_or_default()
            .iter()
            .filter_map(scalar_text)
            .map(|channel| ContactPoint {
                label: "Canal".to_string(),
                value: Some(channel),
            })
            .collect();
        if let Some(owner) = overview
            .owned_by
            .and_then(|o| o.name)
            .filter(|n| !n.trim().is_empty())
        {
            contacts.push(ContactPoint {
                label: "Organisme responsable".to_string(),
                value: Some(owner),
            });
        }

        let summary = normalise_whitespace(overview.description.as_deref().unwrap_or_default());

        let mut details = ServiceDetails::new(
            service_id,
            title,
            self.service_url(service_id),
            PROVIDER_ID,
        );
        details.category_ids = Self::slugs(overview.thematic_area);
        details.summary = (!summary.is_empty()).then_some(summary);
        details.last_updated = last_updated;
        details.steps = steps;
        details.requirements = requirements;
        details.documents = documents;
        details.costs = m_service.fee.as_ref().and_then(scalar_text).into_iter().collect();
        details.processing_time = m_service.delay_time.as_ref().and_then(scalar_text);
        details.contacts = contacts;
        Ok(details)
    }

    fn store_details(&self, details: &ServiceDetails) {
        {
            let mut state = write_state(&self.core.state);
            state.update_services(PROVIDER_ID, &[details.to_summary()], false);
            state.set_service_details(PROVIDER_ID, details.clone());
            state.upsert_selector_profile(
                PROVIDER_ID,
                SelectorProfile {
                    service_id: details.id.clone(),
                    css_selectors: BTreeMap::from([(
                        "api".to_string(),
                        Self::service_path(&details.id),
                    )]),
                    metadata: BTreeMap::new(),
                },
            );
        }
        self.core.rebuild_index();
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl Provider for ServicePublicProvider {
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

        let payload: CategoriesPayload = self
            .core
            .get_json(
                "list_categories",
                CATEGORIES_PATH,
                &[("categories", "true".to_string())],
                !refresh,
            )
            .await?;

        let categories: Vec<Category> = payload
            .categories
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(order, name)| {
                let name = normalise_whitespace(name.as_deref().unwrap_or_default());
                if name.is_empty() {
                    return None;
                }
                let id = slugify(&name);
                Some(Category {
                    url: self.category_url(&id),
                    id,
                    name,
                    provider_id: PROVIDER_ID.to_string(),
                    description: None,
                    parent_id: None,
                    order: Some(order as i64),
                })
            })
            .collect();

        write_state(&self.core.state).update_categories(PROVIDER_ID, &categories, true);
        tracing::debug!(provider = PROVIDER_ID, count = categories.len(), "categories refreshed");
        Ok(Sourced::live(filter_by_parent(categories, parent_id)))
    }

    async fn search_services(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Sourced<SearchPage>, ProviderError> {
        let payload: SearchPayload = self
            .core
            .get_json(
                "search_services",
                SEARCH_PATH,
                &[("query", query.to_string())],
                !options.refresh,
            )
            .await?;

        let matches: Vec<ServiceSummary> = payload
            .services
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| self.summary_from(raw))
            .filter(|summary| match &options.category_id {
                Some(category) => summary.category_ids.iter().any(|c| c == category),
                None => true,
            })
            .collect();

        let total_results = matches.len();
        let page: Vec<ServiceSummary> = matches
            .into_iter()
            .skip(options.offset)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        if !page.is_empty() {
            write_state(&self.core.state).update_services(PROVIDER_ID, &page, false);
            self.core.rebuild_index();
        }
        self.core.record_search_total(total_results);

        Ok(Sourced::live(SearchPage {
            results: page,
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

        let payload: DetailPayload = self
            .core
            .get_json(
                "get_service_details",
                &Self::service_path(service_id),
                &[],
                !refresh,
            )
            .await
            .map_err(|e| not_found_as(e, service_id))?;

        let details = self.details_from(service_id, payload)?;
        self.store_details(&details);
        Ok(Sourced::live(details))
    }

    async fn validate_service(
        &self,
        service_id: &str,
    ) -> Result<Sourced<ServiceDetails>, ProviderError> {
        let details = self.get_service_details(service_id, true).await?;
        tracing::info!(
            provider = PROVIDER_ID,
            service_id,
            title = %details.value.title,
            "service validated"
        );
        Ok(details)
    }

    async fn get_status(&self) -> Value {
        self.core.status().await
    }

    async fn shutdown(&self) {
        self.core.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::testing::{test_config, Canned, MockSite};
    use crate::store::shared_state;
    use serde_json::json;
    use service_public_core::catalog::RegistryState;

    async fn provider(site: &MockSite) -> (ServicePublicProvider, SharedState) {
        let base = site.start().await;
        let state = shared_state(RegistryState::new());
        let provider = ServicePublicProvider::new(&test_config(&base), state.clone(), None).unwrap();
        (provider, state)
    }

    fn detail_payload() -> Value {
        json!({
            "id": "PS0001",
            "name": "Renouvellement carte",
            "overview": {
                "description": "Résumé du service",
                "thematicArea": ["Affaires"],
                "Channelssp": ["En ligne"],
                "ownedBy": {"name": "Agence X"}
            },
            "files": {"forms": [{"name": "Formulaire A", "url": "https://files/formA.pdf"}]},
            "mServiceForms": [{"formfile": "extra.pdf", "formname": "Formulaire B"}],
            "mService": {
                "mActivationDate": "2024-01-01T00:00:00.000Z",
                "mDocuments": "* Pièce d'identité\n* Justificatif",
                "mProcess": "Déposer le dossier\n\nRetirer la carte",
                "fee": "5000 FCFA",
                "delayTime": "48h"
            }
        })
    }

    fn numbered_services(n: usize) -> Value {
        let services: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "id": format!("PS{:04}", i),
                    "name": format!("Service {}", i),
                    "description": "desc",
                    "categories": [if i % 2 == 0 { "Affaires" } else { "Santé" }]
                })
            })
            .collect();
        json!({ "services": services })
    }

    #[tokio::test]
    async fn categories_skip_blank_names_and_slug_ids() {
        let site = MockSite::default();
        site.route(
            CATEGORIES_PATH,
            Canned::json(json!({"services": [], "categories": ["", "Affaires", "Economie"]})),
        );
        let (provider, state) = provider(&site).await;

        let categories = provider.list_categories(None, false).await.unwrap();
        assert!(categories.is_live());
        let ids: Vec<&str> = categories.value.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["affaires", "economie"]);
        assert_eq!(categories.value[0].order, Some(1));
        assert!(categories.value[0].url.ends_with("/public/services?category=affaires"));
        assert_eq!(read_state(&state).catalog(PROVIDER_ID).unwrap().categories().len(), 2);

        let again = provider.list_categories(None, false).await.unwrap();
        assert_eq!(again.source, crate::provider::DataSource::Cache);
        assert_eq!(site.request_count(), 1);
    }

    #[tokio::test]
    async fn search_maps_summaries_and_indexes_them() {
        let site = MockSite::default();
        site.route(
            SEARCH_PATH,
            Canned::json(json!({"services": [
                {"id": "PS0001", "name": "Renouvellement  carte", "description": "Procédure de renouvellement",
                 "categories": ["Affaires", "Administration"]},
                {"id": null, "name": "sans identifiant"},
                {"id": "PS0002", "name": ""}
            ]})),
        );
        let (provider, state) = provider(&site).await;

        let page = provider
            .search_services("test", &SearchOptions::default())
            .await
            .unwrap()
            .value;
        assert_eq!(page.total_results, 1);
        let summary = &page.results[0];
        assert_eq!(summary.id, "PS0001");
        assert_eq!(summary.title, "Renouvellement carte");
        assert_eq!(summary.category_ids, vec!["affaires", "administration"]);
        assert!(summary.url.ends_with("/public/services/service/PS0001"));

        assert!(read_state(&state).catalog(PROVIDER_ID).unwrap().services().contains_key("PS0001"));
        assert_eq!(provider.get_status().await["indexed_services"], 1);

        let (path, params) = site.requests.lock().unwrap()[0].clone();
        assert_eq!(path, SEARCH_PATH);
        assert_eq!(params.get("query").map(String::as_str), Some("test"));
    }

    #[tokio::test]
    async fn search_paginates_after_category_filter() {
        let site = MockSite::default();
        site.route(SEARCH_PATH, Canned::json(numbered_services(20)));
        let (provider, _) = provider(&site).await;

        let first = provider
            .search_services("test", &SearchOptions { limit: Some(5), ..Default::default() })
            .await
            .unwrap()
            .value;
        let second = provider
            .search_services(
                "test",
                &SearchOptions { limit: Some(5), offset: 5, ..Default::default() },
            )
            .await
            .unwrap()
            .value;
        assert_eq!(first.results[0].id, "PS0000");
        assert_eq!(second.results[0].id, "PS0005");
        assert_eq!(first.total_results, 20);

        let filtered = provider
            .search_services(
                "test",
                &SearchOptions {
                    category_id: Some("sante".into()),
                    limit: Some(3),
                    offset: 2,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .value;
        assert_eq!(filtered.total_results, 10);
        let ids: Vec<&str> = filtered.results.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["PS0005", "PS0007", "PS0009"]);
    }

    #[tokio::test]
    async fn search_without_limit_returns_everything() {
        let site = MockSite::default();
        site.route(SEARCH_PATH, Canned::json(numbered_services(15)));
        let (provider, _) = provider(&site).await;

        let page = provider
            .search_services("test", &SearchOptions::default())
            .await
            .unwrap()
            .value;
        assert_eq!(page.results.len(), 15);
        assert_eq!(provider.get_status().await["last_search_total"], 15);
    }

    #[tokio::test]
    async fn details_are_parsed_from_the_service_record() {
        let site = MockSite::default();
        site.route("api/portal/publicservices/PS0001", Canned::json(detail_payload()));
        let (provider, state) = provider(&site).await;

        let details = provider.get_service_details("PS0001", false).await.unwrap();
        assert!(details.is_live());
        let details = details.value;
        assert_eq!(details.title, "Renouvellement carte");
        assert!(details.url.ends_with("/public/services/service/PS0001"));
        assert_eq!(details.summary.as_deref(), Some("Résumé du service"));
        assert_eq!(details.category_ids, vec!["affaires"]);
        assert_eq!(details.documents[0].title, "Formulaire A");
        assert_eq!(
            details.documents[1].url.as_deref(),
            Some("https://catis.xroad.bj//publicservices/PS0001/files/extra.pdf")
        );
        assert_eq!(details.requirements[0].title, "Pièce d'identité");
        assert_eq!(details.requirements.len(), 2);
        assert_eq!(details.steps[0].title, "Étape 1");
        assert_eq!(details.steps[1].content, "Retirer la carte");
        assert_eq!(details.costs, vec!["5000 FCFA"]);
        assert_eq!(details.processing_time.as_deref(), Some("48h"));
        assert!(details.contacts.iter().any(|c| c.value.as_deref() == Some("Agence X")));
        assert_eq!(
            details.last_updated.map(|d| d.to_rfc3339()),
            Some("2024-01-01T00:00:00+00:00".to_string())
        );

        let state = read_state(&state);
        let catalog = state.catalog(PROVIDER_ID).unwrap();
        assert!(catalog.services().contains_key("PS0001"));
        assert_eq!(
            catalog.selector_profiles()["PS0001"].css_selectors["api"],
            "api/portal/publicservices/PS0001"
        );
    }

    #[tokio::test]
    async fn details_come_from_catalog_unless_refreshed() {
        let site = MockSite::default();
        site.route("api/portal/publicservices/PS0001", Canned::json(detail_payload()));
        let (provider, _) = provider(&site).await;

        provider.get_service_details("PS0001", false).await.unwrap();
        let cached = provider.get_service_details("PS0001", false).await.unwrap();
        assert!(!cached.is_live());
        assert_eq!(site.request_count(), 1);

        let refreshed = provider.get_service_details("PS0001", true).await.unwrap();
        assert!(refreshed.is_live());
        assert_eq!(site.request_count(), 2);
    }

    #[tokio::test]
    async fn missing_service_is_not_found_and_titleless_is_parse_error() {
        let site = MockSite::default();
        site.route("api/portal/publicservices/EMPTY", Canned::json(json!({"id": "EMPTY"})));
        let (provider, _) = provider(&site).await;

        let missing = provider.get_service_details("NOPE", true).await.unwrap_err();
        assert!(missing.is_not_found());
        let titleless = provider.get_service_details("EMPTY", true).await.unwrap_err();
        assert!(matches!(titleless, ProviderError::Parse(_)));
    }

    #[tokio::test]
    async fn shutdown_closes_the_fetcher() {
        let site = MockSite::default();
        let (provider, _) = provider(&site).await;
        provider.shutdown().await;
        provider.shutdown().await;
        assert_eq!(provider.get_status().await["closed"], true);
        assert!(provider.search_services("x", &SearchOptions::default()).await.is_err());
    }
}
