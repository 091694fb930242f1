//! Core data models shared by providers, the catalog, and the tool layer.
//!
//! These types are the JSON shapes returned to callers and persisted in
//! the registry snapshot. Optional fields serialize as `null`; missing
//! optional or collection fields deserialize to their defaults so older
//! snapshots keep loading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A category or thematic grouping of services.
///
/// Categories form a forest through `parent_id`. Nothing guarantees the
/// forest is acyclic, so every traversal bounds itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Opaque identifier, unique within the owning provider.
    pub id: String,
    pub name: String,
    pub url: String,
    pub provider_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Display sequence as reported by the source.
    #[serde(default)]
    pub order: Option<i64>,
}

/// A procedure step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub content: String,
}

/// A requirement or prerequisite for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
}

/// A downloadable document or related external resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentLink {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
}

/// A contact channel or responsible office.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactPoint {
    pub label: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Lightweight service record used in listings and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    /// Identifier, unique within the owning provider.
    pub id: String,
    pub title: String,
    pub url: String,
    pub provider_id: String,
    /// Categories this service belongs to. Membership may be multiple and
    /// ids are not checked against the category set.
    #[serde(default)]
    pub category_ids: Vec<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    /// Relevance score set by search ranking only. Never meaningful once
    /// stored back in a catalog.
    #[serde(default)]
    pub score: Option<f64>,
}

/// Full service information for detail views.
///
/// Carries every [`ServiceSummary`] field under the same JSON keys, plus
/// the detail-only fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDetails {
    pub id: String,
    pub title: String,
    pub url: String,
    pub provider_id: String,
    #[serde(default)]
    pub category_ids: Vec<String>,
    #[serde(default)]
    pub excerpt: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,

    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    #[serde(default)]
    pub documents: Vec<DocumentLink>,
    #[serde(default)]
    pub costs: Vec<String>,
    #[serde(default)]
    pub processing_time: Option<String>,
    #[serde(default)]
    pub contacts: Vec<ContactPoint>,
    #[serde(default)]
    pub external_links: Vec<DocumentLink>,
}

impl ServiceDetails {
    /// Create a details record with only the summary fields populated.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        provider_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            url: url.into(),
            provider_id: provider_id.into(),
            category_ids: Vec::new(),
            excerpt: None,
            score: None,
            summary: None,
            last_updated: None,
            steps: Vec::new(),
            requirements: Vec::new(),
            documents: Vec::new(),
            costs: Vec::new(),
            processing_time: None,
            contacts: Vec::new(),
            external_links: Vec::new(),
        }
    }

    /// Project the details back onto a summary.
    ///
    /// The excerpt falls back to the summary text so services first seen
    /// through a detail fetch still carry searchable text.
    pub fn to_summary(&self) -> ServiceSummary {
        ServiceSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            provider_id: self.provider_id.clone(),
            category_ids: self.category_ids.clone(),
            excerpt: self.excerpt.clone().or_else(|| self.summary.clone()),
            score: None,
        }
    }
}
