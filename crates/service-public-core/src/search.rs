//! Token index with a fuzzy fallback over one provider's catalog.
//!
//! The index maps each token of a service's title and excerpt to the ids
//! of the services containing it. It does **not** follow the catalog: the
//! owning provider calls [`ServiceSearchIndex::rebuild`] after every
//! catalog mutation.
//!
//! # Scoring
//!
//! ```text
//! score = matched_query_tokens × 10 + partial_ratio(query, title)
//! ```
//!
//! When no query token hits the index, every indexed service is scored
//! by `partial_ratio` alone and only scores of at least
//! [`FUZZY_THRESHOLD`] survive.

use std::collections::{HashMap, HashSet};

use crate::catalog::ProviderCatalog;
use crate::fuzzy::partial_ratio;
use crate::models::ServiceSummary;
use crate::text::normalise_whitespace;

/// Minimum fuzzy score for the no-token-match fallback.
pub const FUZZY_THRESHOLD: f64 = 40.0;

const TOKEN_WEIGHT: f64 = 10.0;

/// Lowercase, replace non-word characters with spaces, split, drop empties.
///
/// Word characters are Unicode alphanumerics and `_`, so accented letters
/// survive as part of their token.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = normalise_whitespace(text).to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect();
    cleaned
        .split_whitespace()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Inverted token index for one provider.
#[derive(Debug, Clone, Default)]
pub struct ServiceSearchIndex {
    tokens: HashMap<String, Vec<String>>,
    /// Indexed ids in catalog order; used for tie-breaking.
    order: Vec<String>,
}

impl ServiceSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index built from the catalog's current services.
    pub fn from_catalog(catalog: &ProviderCatalog) -> Self {
        let mut index = Self::new();
        index.rebuild(catalog);
        index
    }

    /// Re-tokenize every service in `catalog`.
    ///
    /// The new map is built aside and swapped in, so a reader never sees a
    /// half-populated index.
    pub fn rebuild(&mut self, catalog: &ProviderCatalog) {
        let mut tokens: HashMap<String, Vec<String>> = HashMap::new();
        let mut order = Vec::with_capacity(catalog.services().len());

        for (service_id, service) in catalog.services() {
            order.push(service_id.clone());
            let mut text = service.title.clone();
            if let Some(excerpt) = &service.excerpt {
                text.push(' ');
                text.push_str(excerpt);
            }
            for token in tokenize(&text) {
                let ids = tokens.entry(token).or_default();
                if !ids.contains(service_id) {
                    ids.push(service_id.clone());
                }
            }
        }

        self.tokens = tokens;
        self.order = order;
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Rank services for `query`, best first, at most `limit` results.
    ///
    /// Results are copies carrying their score; the catalog is untouched.
    pub fn search(&self, catalog: &ProviderCatalog, query: &str, limit: usize) -> Vec<ServiceSummary> {
        let query_lower = normalise_whitespace(query).to_lowercase();
        if query_lower.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for token in tokenize(&query_lower) {
            if let Some(ids) = self.tokens.get(&token) {
                for id in ids {
                    *counts.entry(id.as_str()).or_default() += 1;
                }
            }
        }

        let mut scored: Vec<(f64, &ServiceSummary)> = Vec::new();
        if counts.is_empty() {
            for id in &self.order {
                let Some(service) = catalog.services().get(id) else {
                    continue;
                };
                let score = partial_ratio(&query_lower, &service.title.to_lowercase());
                if score >= FUZZY_THRESHOLD {
                    scored.push((score, service));
                }
            }
        } else {
            for id in &self.order {
                let Some(count) = counts.get(id.as_str()) else {
                    continue;
                };
                let Some(service) = catalog.services().get(id) else {
                    continue;
                };
                let score = *count as f64 * TOKEN_WEIGHT
                    + partial_ratio(&query_lower, &service.title.to_lowercase());
                scored.push((score, service));
            }
        }

        // Stable: equal scores keep catalog order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut seen = HashSet::new();
        scored
            .into_iter()
            .filter(|(_, service)| seen.insert(service.id.as_str()))
            .take(limit)
            .map(|(score, service)| {
                let mut result = service.clone();
                result.score = Some(score);
                result
            })
            .collect()
    }
}
