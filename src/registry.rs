//! Provider registry.
//!
//! Holds every enabled provider together with its [`ProviderDescriptor`].
//! Registration enforces one descriptor per provider and that the
//! descriptor's id matches the provider's own id.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::ProviderError;
use crate::provider::{Provider, ProviderDescriptor};

struct Entry {
    provider: Arc<dyn Provider>,
    descriptor: ProviderDescriptor,
}

#[derive(Default)]
pub struct ProviderRegistry {
    entries: IndexMap<String, Entry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        provider: Arc<dyn Provider>,
        descriptor: ProviderDescriptor,
    ) -> Result<(), ProviderError> {
        let id = provider.provider_id().to_string();
        if self.entries.contains_key(&id) {
            return Err(ProviderError::Initialisation(format!(
                "provider '{}' already registered",
                id
            )));
        }
        if descriptor.id != id {
            return Err(ProviderError::Initialisation(format!(
                "descriptor id '{}' does not match provider id '{}'",
                descriptor.id, id
            )));
        }
        self.entries.insert(
            id,
            Entry {
                provider,
                descriptor,
            },
        );
        Ok(())
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.entries
            .get(provider_id)
            .map(|e| e.provider.clone())
            .ok_or_else(|| ProviderError::NotRegistered(provider_id.to_string()))
    }

    pub fn get_descriptor(&self, provider_id: &str) -> Result<&ProviderDescriptor, ProviderError> {
        self.entries
            .get(provider_id)
            .map(|e| &e.descriptor)
            .ok_or_else(|| ProviderError::NotRegistered(provider_id.to_string()))
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.entries.values().map(|e| &e.provider)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Descriptors by priority, highest first; ties keep registration order.
    pub fn ordered_descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self.descriptors().cloned().collect();
        descriptors.sort_by(|a, b| b.priority.cmp(&a.priority));
        descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
