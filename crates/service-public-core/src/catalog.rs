//! Per-provider catalog store and the registry state that owns it.
//!
//! A [`ProviderCatalog`] holds one provider's categories, services, and
//! service details, plus two derived indices:
//!
//! - `category_children`: parent id (or `None` for roots) → child ids
//! - `services_by_category`: category id → service ids
//!
//! The derived indices are **always** rebuilt in full from the
//! authoritative maps after a mutation, never patched, so they cannot
//! drift from the maps they describe.
//!
//! [`RegistryState`] maps provider ids to catalogs and is the single
//! source of truth for everything persisted. Providers read and write
//! through it; they never own catalog data themselves.
//!
//! # Snapshot shape
//!
//! ```json
//! { "providers": [ { "provider_id": "…", "categories": [], "services": [],
//!                    "service_details": [], "selector_profiles": [] } ] }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::{Category, ServiceDetails, ServiceSummary};

/// Provenance notes describing how a service's data was extracted.
///
/// Persisted with the catalog for diagnostics; nothing in the request
/// path reads it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectorProfile {
    pub service_id: String,
    #[serde(default)]
    pub css_selectors: BTreeMap<String, String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Serialized form of one provider's catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub provider_id: String,
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub services: Vec<ServiceSummary>,
    #[serde(default)]
    pub service_details: Vec<ServiceDetails>,
    #[serde(default)]
    pub selector_profiles: Vec<SelectorProfile>,
}

/// Serialized form of the whole registry state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub providers: Vec<CatalogSnapshot>,
}

/// Catalog of data for a single provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalog {
    provider_id: String,
    categories: IndexMap<String, Category>,
    services: IndexMap<String, ServiceSummary>,
    service_details: IndexMap<String, ServiceDetails>,
    selector_profiles: IndexMap<String, SelectorProfile>,
    category_children: HashMap<Option<String>, Vec<String>>,
    services_by_category: HashMap<String, Vec<String>>,
}

impl ProviderCatalog {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            ..Self::default()
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn categories(&self) -> &IndexMap<String, Category> {
        &self.categories
    }

    pub fn services(&self) -> &IndexMap<String, ServiceSummary> {
        &self.services
    }

    pub fn service_details_map(&self) -> &IndexMap<String, ServiceDetails> {
        &self.service_details
    }

    pub fn selector_profiles(&self) -> &IndexMap<String, SelectorProfile> {
        &self.selector_profiles
    }

    /// Child ids keyed by parent id (`None` is the root bucket).
    pub fn category_children(&self) -> &HashMap<Option<String>, Vec<String>> {
        &self.category_children
    }

    pub fn services_by_category(&self) -> &HashMap<String, Vec<String>> {
        &self.services_by_category
    }

    /// Upsert categories by id, optionally clearing the set first, then
    /// rebuild the parent → children index.
    pub fn update_categories(&mut self, categories: &[Category], replace: bool) {
        if replace {
            self.categories.clear();
        }
        for category in categories {
            self.categories
                .insert(category.id.clone(), category.clone());
        }
        self.rebuild_category_children();
    }

    /// Upsert services by id, then rebuild the category → services index.
    ///
    /// With `replace`, the service set is cleared first and cached details
    /// whose id no longer appears among `services` are pruned.
    pub fn update_services(&mut self, services: &[ServiceSummary], replace: bool) {
        if replace {
            self.services.clear();
            let keep: HashSet<&str> = services.iter().map(|s| s.id.as_str()).collect();
            self.service_details
                .retain(|id, _| keep.contains(id.as_str()));
        }
        for service in services {
            let mut stored = service.clone();
            stored.score = None;
            self.services.insert(service.id.clone(), stored);
        }
        self.rebuild_services_by_category();
    }

    pub fn set_service_details(&mut self, details: ServiceDetails) {
        self.service_details.insert(details.id.clone(), details);
    }

    pub fn get_service_details(&self, service_id: &str) -> Option<&ServiceDetails> {
        self.service_details.get(service_id)
    }

    pub fn upsert_selector_profile(&mut self, profile: SelectorProfile) {
        self.selector_profiles
            .insert(profile.service_id.clone(), profile);
    }

    /// Categories whose parent is `parent_id` (`None` lists the roots).
    pub fn categories_for_parent(&self, parent_id: Option<&str>) -> Vec<Category> {
        let key = parent_id.map(str::to_string);
        self.category_children
            .get(&key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.categories.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Path from the root down to `category_id`.
    ///
    /// Stops early and returns the partial path when an ancestor is
    /// missing or a cycle is detected.
    pub fn breadcrumb(&self, category_id: &str) -> Vec<Category> {
        let mut path = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = Some(category_id);

        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let Some(category) = self.categories.get(id) else {
                break;
            };
            path.push(category.clone());
            current = category.parent_id.as_deref();
        }

        path.reverse();
        path
    }

    pub fn services_for_category(&self, category_id: &str) -> Vec<ServiceSummary> {
        self.services_by_category
            .get(category_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.services.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot {
            provider_id: self.provider_id.clone(),
            categories: self.categories.values().cloned().collect(),
            services: self.services.values().cloned().collect(),
            service_details: self.service_details.values().cloned().collect(),
            selector_profiles: self.selector_profiles.values().cloned().collect(),
        }
    }

    /// Rebuild a catalog from its snapshot.
    ///
    /// Categories load before services; service category ids are not
    /// validated against the category set.
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut catalog = Self::new(snapshot.provider_id);
        catalog.update_categories(&snapshot.categories, true);
        catalog.update_services(&snapshot.services, false);
        for details in snapshot.service_details {
            catalog.set_service_details(details);
        }
        for profile in snapshot.selector_profiles {
            catalog.upsert_selector_profile(profile);
        }
        catalog
    }

    fn rebuild_category_children(&mut self) {
        self.category_children.clear();
        for category in self.categories.values() {
            self.category_children
                .entry(category.parent_id.clone())
                .or_default()
                .push(category.id.clone());
        }
    }

    fn rebuild_services_by_category(&mut self) {
        self.services_by_category.clear();
        for service in self.services.values() {
            for category_id in &service.category_ids {
                self.services_by_category
                    .entry(category_id.clone())
                    .or_default()
                    .push(service.id.clone());
            }
        }
    }
}

/// Container for every provider catalog.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    catalogs: IndexMap<String, ProviderCatalog>,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the provider's catalog, creating an empty one on first use.
    pub fn ensure_catalog(&mut self, provider_id: &str) -> &mut ProviderCatalog {
        self.catalogs
            .entry(provider_id.to_string())
            .or_insert_with(|| ProviderCatalog::new(provider_id))
    }

    /// Non-creating lookup.
    pub fn catalog(&self, provider_id: &str) -> Option<&ProviderCatalog> {
        self.catalogs.get(provider_id)
    }

    pub fn catalogs(&self) -> impl Iterator<Item = &ProviderCatalog> {
        self.catalogs.values()
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.catalogs.keys().cloned().collect()
    }

    pub fn update_categories(&mut self, provider_id: &str, categories: &[Category], replace: bool) {
        self.ensure_catalog(provider_id)
            .update_categories(categories, replace);
    }

    pub fn update_services(
        &mut self,
        provider_id: &str,
        services: &[ServiceSummary],
        replace: bool,
    ) {
        self.ensure_catalog(provider_id)
            .update_services(services, replace);
    }

    pub fn set_service_details(&mut self, provider_id: &str, details: ServiceDetails) {
        self.ensure_catalog(provider_id)
            .set_service_details(details);
    }

    pub fn get_service_details(&self, provider_id: &str, service_id: &str) -> Option<&ServiceDetails> {
        self.catalog(provider_id)
            .and_then(|c| c.get_service_details(service_id))
    }

    pub fn upsert_selector_profile(&mut self, provider_id: &str, profile: SelectorProfile) {
        self.ensure_catalog(provider_id)
            .upsert_selector_profile(profile);
    }

    pub fn categories_for_parent(&self, provider_id: &str, parent_id: Option<&str>) -> Vec<Category> {
        self.catalog(provider_id)
            .map(|c| c.categories_for_parent(parent_id))
            .unwrap_or_default()
    }

    pub fn breadcrumb(&self, provider_id: &str, category_id: &str) -> Vec<Category> {
        self.catalog(provider_id)
            .map(|c| c.breadcrumb(category_id))
            .unwrap_or_default()
    }

    pub fn services_for_category(&self, provider_id: &str, category_id: &str) -> Vec<ServiceSummary> {
        self.catalog(provider_id)
            .map(|c| c.services_for_category(category_id))
            .unwrap_or_default()
    }

    pub fn to_snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            providers: self.catalogs.values().map(|c| c.to_snapshot()).collect(),
        }
    }

    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut state = Self::new();
        for provider in snapshot.providers {
            let catalog = ProviderCatalog::from_snapshot(provider);
            state
                .catalogs
                .insert(catalog.provider_id().to_string(), catalog);
        }
        state
    }
}
