//! Application lifecycle.
//!
//! [`AppContext::boot`] wires everything together in one place:
//!
//! 1. validate the config
//! 2. load the registry snapshot (a missing file starts empty)
//! 3. build and register every enabled provider, applying priority overrides
//! 4. initialise the providers
//! 5. build the orchestrator and the tool registry
//!
//! [`AppContext::shutdown`] closes the providers and saves the snapshot.

use std::sync::Arc;

use anyhow::{Context, Result};

use service_public_core::catalog::RegistryState;

use crate::config::Config;
use crate::error::ProviderError;
use crate::health::HealthMonitor;
use crate::orchestrator::Orchestrator;
use crate::provider::{Provider, ProviderDescriptor};
use crate::providers::{finances, service_public, FinancesProvider, ServicePublicProvider};
use crate::registry::ProviderRegistry;
use crate::store::{read_state, shared_state, RegistryStore, SharedState, StatePersister};
use crate::tools::{ToolContext, ToolRegistry};

/// Provider ids this build knows how to construct.
pub const KNOWN_PROVIDERS: &[&str] = &[service_public::PROVIDER_ID, finances::PROVIDER_ID];

/// Construct a built-in provider by id.
pub fn build_provider(
    provider_id: &str,
    config: &Config,
    state: SharedState,
    health: Option<Arc<HealthMonitor>>,
) -> Result<(Arc<dyn Provider>, ProviderDescriptor), ProviderError> {
    let (provider, descriptor): (Arc<dyn Provider>, ProviderDescriptor) = match provider_id {
        service_public::PROVIDER_ID => (
            Arc::new(ServicePublicProvider::new(config, state, health)?),
            ServicePublicProvider::descriptor(),
        ),
        finances::PROVIDER_ID => (
            Arc::new(FinancesProvider::new(config, state, health)?),
            FinancesProvider::descriptor(),
        ),
        other => {
            return Err(ProviderError::Initialisation(format!(
                "unknown provider '{}' (known: {})",
                other,
                KNOWN_PROVIDERS.join(", ")
            )))
        }
    };
    let descriptor = match config.priority_for(provider_id) {
        Some(priority) => descriptor.with_priority(priority),
        None => descriptor,
    };
    Ok((provider, descriptor))
}

/// Everything a running process needs, constructed once at boot.
pub struct AppContext {
    pub config: Arc<Config>,
    pub state: SharedState,
    pub store: Arc<RegistryStore>,
    pub health: Arc<HealthMonitor>,
    pub registry: Arc<ProviderRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub tools: Arc<ToolRegistry>,
}

impl AppContext {
    pub async fn boot(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let store = Arc::new(RegistryStore::new(config.snapshot_path()));
        let initial = match store.load() {
            Ok(Some(state)) => {
                tracing::info!(path = %store.path().display(), providers = state.provider_ids().len(), "registry snapshot loaded");
                state
            }
            Ok(None) => RegistryState::new(),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring unreadable registry snapshot");
                RegistryState::new()
            }
        };
        let state = shared_state(initial);
        let health = Arc::new(HealthMonitor::default());

        let mut registry = ProviderRegistry::new();
        for provider_id in &config.enabled_providers {
            let (provider, descriptor) =
                build_provider(provider_id, &config, state.clone(), Some(health.clone()))?;
            registry.register(provider, descriptor)?;
        }
        for provider in registry.all() {
            provider
                .initialise()
                .await
                .with_context(|| format!("Failed to initialise provider '{}'", provider.provider_id()))?;
        }
        let registry = Arc::new(registry);

        let persister = Arc::new(StatePersister::new(store.clone(), state.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            state.clone(),
            Some(persister),
        ));

        tracing::info!(
            providers = ?registry.ordered_descriptors().iter().map(|d| d.id.clone()).collect::<Vec<_>>(),
            "application booted"
        );

        Ok(Self {
            config: Arc::new(config),
            state,
            store,
            health,
            registry,
            orchestrator,
            tools: Arc::new(ToolRegistry::with_builtins()),
        })
    }

    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.orchestrator.clone())
    }

    /// `(categories, services, details)` held for a provider.
    pub fn catalog_counts(&self, provider_id: &str) -> (usize, usize, usize) {
        read_state(&self.state)
            .catalog(provider_id)
            .map(|c| {
                (
                    c.categories().len(),
                    c.services().len(),
                    c.service_details_map().len(),
                )
            })
            .unwrap_or((0, 0, 0))
    }

    /// Close every provider, then save the snapshot.
    pub async fn shutdown(&self) -> Result<()> {
        for provider in self.registry.all() {
            provider.shutdown().await;
        }
        self.store
            .save(&self.state)
            .await
            .context("Failed to save registry snapshot")?;
        tracing::info!(path = %self.store.path().display(), "shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            cache_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn boots_default_providers_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config
            .provider_priorities
            .insert(finances::PROVIDER_ID.to_string(), 150);

        let app = AppContext::boot(config).await.unwrap();
        let ids: Vec<String> = app
            .orchestrator
            .list_providers()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["finances-bj", "service-public-bj"]);
        assert_eq!(app.tools.len(), 6);

        app.shutdown().await.unwrap();
        app.shutdown().await.unwrap();
        assert!(dir.path().join("registry.json").exists());
    }

    #[tokio::test]
    async fn unknown_provider_aborts_boot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.enabled_providers = vec!["service-public-bj".into(), "douanes-bj".into()];

        let err = AppContext::boot(config).await.err().unwrap();
        assert!(format!("{:#}", err).contains("douanes-bj"));
    }

    #[tokio::test]
    async fn invalid_config_aborts_boot() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.concurrency = 0;
        assert!(AppContext::boot(config).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut seeded = RegistryState::new();
        seeded.update_categories(
            "service-public-bj",
            &[service_public_core::models::Category {
                id: "justice".into(),
                name: "Justice".into(),
                url: "https://service-public.bj/public/services?category=justice".into(),
                provider_id: "service-public-bj".into(),
                description: None,
                parent_id: None,
                order: Some(0),
            }],
            true,
        );
        RegistryStore::new(dir.path().join("registry.json"))
            .save(&shared_state(seeded))
            .await
            .unwrap();

        let app = AppContext::boot(config_in(dir.path())).await.unwrap();
        assert_eq!(app.catalog_counts("service-public-bj"), (1, 0, 0));

        let answer = app
            .orchestrator
            .list_categories(Some("service-public-bj"), None, false)
            .await
            .unwrap();
        assert_eq!(answer.source, crate::provider::DataSource::Cache);
        assert_eq!(answer.value[0].id, "justice");
        app.shutdown().await.unwrap();
    }
}
