//! End-to-end routing and fallback tests.
//!
//! Scripted in-memory providers stand in for the websites so every path
//! through the orchestrator can be driven deterministically: empty results,
//! upstream failures, unknown services, cached catalogs, and persistence.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use service_public_bj::catalog::RegistryState;
use service_public_bj::error::{FetchError, PersistError, ProviderError, ToolError};
use service_public_bj::models::{Category, ServiceDetails, ServiceSummary};
use service_public_bj::orchestrator::Orchestrator;
use service_public_bj::provider::{
    DataSource, Provider, ProviderDescriptor, SearchOptions, SearchPage, Sourced,
};
use service_public_bj::registry::ProviderRegistry;
use service_public_bj::store::{
    read_state, shared_state, write_state, RegistryStore, SharedState, SnapshotPersister,
    StatePersister,
};
use service_public_bj::tools::{ToolContext, ToolRegistry};

// ─── Scripted provider ──────────────────────────────────────────────

#[derive(Clone)]
enum Script {
    /// Serves these services and their details.
    Serves(Vec<ServiceSummary>),
    /// Succeeds with nothing; details are unknown.
    Empty,
    /// Every call fails with this HTTP status.
    Fails(u16),
}

struct ScriptedProvider {
    id: String,
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script,
            calls: AtomicUsize::new(0),
        }
    }

    fn failure(&self, status: u16) -> ProviderError {
        ProviderError::Fetch(FetchError::Status {
            status,
            url: format!("https://{}.test/", self.id),
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn initialise(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn list_categories(
        &self,
        _parent_id: Option<&str>,
        _refresh: bool,
    ) -> Result<Sourced<Vec<Category>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Serves(_) => Ok(Sourced::live(vec![category(&self.id, "etat-civil")])),
            Script::Empty => Ok(Sourced::live(Vec::new())),
            Script::Fails(status) => Err(self.failure(*status)),
        }
    }

    async fn search_services(
        &self,
        _query: &str,
        options: &SearchOptions,
    ) -> Result<Sourced<SearchPage>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Serves(services) => Ok(Sourced::live(SearchPage {
                results: services
                    .iter()
                    .skip(options.offset)
                    .take(options.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect(),
                total_results: services.len(),
            })),
            Script::Empty => Ok(Sourced::live(SearchPage::default())),
            Script::Fails(status) => Err(self.failure(*status)),
        }
    }

    async fn get_service_details(
        &self,
        service_id: &str,
        _refresh: bool,
    ) -> Result<Sourced<ServiceDetails>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Serves(services) => services
                .iter()
                .find(|s| s.id == service_id)
                .map(|s| Sourced::live(ServiceDetails::new(&s.id, &s.title, &s.url, &self.id)))
                .ok_or_else(|| ProviderError::NotFound(service_id.to_string())),
            Script::Empty => Err(ProviderError::NotFound(service_id.to_string())),
            Script::Fails(status) => Err(self.failure(*status)),
        }
    }

    async fn get_status(&self) -> Value {
        json!({ "provider_id": self.id, "calls": self.calls.load(Ordering::SeqCst) })
    }

    async fn shutdown(&self) {}
}

// ─── Persistence doubles ────────────────────────────────────────────

#[derive(Default)]
struct CountingPersister {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl SnapshotPersister for CountingPersister {
    async fn persist(&self) -> Result<(), PersistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PersistError::Task("disk full".into()));
        }
        Ok(())
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn category(provider_id: &str, id: &str) -> Category {
    Category {
        id: id.to_string(),
        name: id.to_string(),
        url: format!("https://{}.test/{}", provider_id, id),
        provider_id: provider_id.to_string(),
        description: None,
        parent_id: None,
        order: Some(0),
    }
}

fn service(provider_id: &str, id: &str, title: &str) -> ServiceSummary {
    ServiceSummary {
        id: id.to_string(),
        title: title.to_string(),
        url: format!("https://{}.test/{}", provider_id, id),
        provider_id: provider_id.to_string(),
        category_ids: vec!["etat-civil".to_string()],
        excerpt: None,
        score: None,
    }
}

fn descriptor(id: &str, priority: i64, tags: &[&str]) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        description: format!("{} test provider", id),
        priority,
        coverage_tags: tags.iter().map(|t| t.to_string()).collect(),
        supported_tools: Vec::new(),
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    providers: Vec<Arc<ScriptedProvider>>,
    persister: Arc<CountingPersister>,
}

impl Harness {
    fn calls(&self, index: usize) -> usize {
        self.providers[index].calls.load(Ordering::SeqCst)
    }

    fn persist_calls(&self) -> usize {
        self.persister.calls.load(Ordering::SeqCst)
    }
}

fn harness_with(
    entries: Vec<(ProviderDescriptor, Script)>,
    state: SharedState,
    persister: CountingPersister,
) -> Harness {
    let mut registry = ProviderRegistry::new();
    let mut providers = Vec::new();
    for (descriptor, script) in entries {
        let provider = Arc::new(ScriptedProvider::new(&descriptor.id, script));
        registry.register(provider.clone(), descriptor).unwrap();
        providers.push(provider);
    }
    let persister = Arc::new(persister);
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        state,
        Some(persister.clone()),
    ));
    Harness {
        orchestrator,
        providers,
        persister,
    }
}

fn harness(entries: Vec<(ProviderDescriptor, Script)>) -> Harness {
    harness_with(
        entries,
        shared_state(RegistryState::new()),
        CountingPersister::default(),
    )
}

fn options(limit: usize, offset: usize) -> SearchOptions {
    SearchOptions {
        limit: Some(limit),
        offset,
        ..SearchOptions::default()
    }
}

// ─── Search routing ─────────────────────────────────────────────────

#[tokio::test]
async fn empty_primary_falls_through_to_next_provider() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Empty),
        (
            descriptor("beta", 50, &[]),
            Script::Serves(vec![service("beta", "PS001", "Passeport ordinaire")]),
        ),
    ]);

    let answer = h
        .orchestrator
        .search_services("passeport", None, &options(10, 0))
        .await
        .unwrap();

    assert_eq!(answer.provider_id, "beta");
    assert_eq!(answer.source, DataSource::Live);
    assert_eq!(answer.value.results[0].id, "PS001");
    assert_eq!(answer.warnings, vec!["alpha: no results"]);
    assert_eq!(h.persist_calls(), 1);
}

#[tokio::test]
async fn first_non_empty_answer_stops_the_walk() {
    let h = harness(vec![
        (
            descriptor("alpha", 100, &[]),
            Script::Serves(vec![service("alpha", "A1", "Casier judiciaire")]),
        ),
        (
            descriptor("beta", 50, &[]),
            Script::Serves(vec![service("beta", "B1", "Casier judiciaire")]),
        ),
    ]);

    let answer = h
        .orchestrator
        .search_services("casier", None, &options(10, 0))
        .await
        .unwrap();

    assert_eq!(answer.provider_id, "alpha");
    assert!(answer.warnings.is_empty());
    assert_eq!(h.calls(1), 0);
}

#[tokio::test]
async fn every_provider_failing_is_an_aggregate_failure() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Fails(503)),
        (descriptor("beta", 50, &[]), Script::Fails(500)),
    ]);

    let err = h
        .orchestrator
        .search_services("passeport", None, &options(10, 0))
        .await
        .unwrap_err();

    match err {
        ToolError::ProviderAggregateFailure { message, warnings } => {
            assert!(message.contains("alpha, beta"), "{}", message);
            assert_eq!(warnings.len(), 2);
            assert!(warnings[0].starts_with("alpha: HTTP 503"));
            assert!(warnings[1].starts_with("beta: HTTP 500"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.persist_calls(), 0);
}

#[tokio::test]
async fn all_empty_returns_last_empty_answer_with_warnings() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Empty),
        (descriptor("beta", 50, &[]), Script::Empty),
    ]);

    let answer = h
        .orchestrator
        .search_services("introuvable", None, &options(10, 0))
        .await
        .unwrap();

    assert_eq!(answer.provider_id, "beta");
    assert!(answer.value.results.is_empty());
    assert_eq!(answer.warnings, vec!["alpha: no results", "beta: no results"]);
}

#[tokio::test]
async fn pagination_is_passed_through() {
    let services: Vec<ServiceSummary> = (0..20)
        .map(|i| service("alpha", &format!("PS{:03}", i), &format!("Service {}", i)))
        .collect();
    let h = harness(vec![(descriptor("alpha", 100, &[]), Script::Serves(services))]);

    let answer = h
        .orchestrator
        .search_services("service", None, &options(5, 5))
        .await
        .unwrap();

    let ids: Vec<&str> = answer.value.results.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["PS005", "PS006", "PS007", "PS008", "PS009"]);
    assert_eq!(answer.value.total_results, 20);
}

#[tokio::test]
async fn topical_affinity_beats_priority() {
    let h = harness(vec![
        (
            descriptor("generalist", 100, &["passeport", "etat civil"]),
            Script::Serves(vec![service("generalist", "G1", "Quitus fiscal")]),
        ),
        (
            descriptor("finances", 80, &["impots", "taxes"]),
            Script::Serves(vec![service("finances", "F1", "Quitus fiscal")]),
        ),
    ]);

    let answer = h
        .orchestrator
        .search_services("impots", None, &options(10, 0))
        .await
        .unwrap();
    assert_eq!(answer.provider_id, "finances");

    let answer = h
        .orchestrator
        .search_services("passeport", None, &options(10, 0))
        .await
        .unwrap();
    assert_eq!(answer.provider_id, "generalist");
}

#[tokio::test]
async fn failing_provider_is_served_from_catalog() {
    let mut seeded = RegistryState::new();
    seeded.update_services(
        "alpha",
        &[
            service("alpha", "PS001", "Demande de carte d'identité"),
            service("alpha", "PS002", "Permis de conduire"),
        ],
        true,
    );
    let h = harness_with(
        vec![(descriptor("alpha", 100, &[]), Script::Fails(503))],
        shared_state(seeded),
        CountingPersister::default(),
    );

    let answer = h
        .orchestrator
        .search_services("carte identite", None, &options(10, 0))
        .await
        .unwrap();

    assert_eq!(answer.source, DataSource::Cache);
    assert_eq!(answer.value.results[0].id, "PS001");
    assert!(answer.value.results[0].score.is_some());
    assert!(answer.warnings[0].starts_with("alpha: HTTP 503"));
    assert_eq!(h.persist_calls(), 0);
}

// ─── Explicit provider ──────────────────────────────────────────────

#[tokio::test]
async fn unknown_explicit_provider_is_rejected() {
    let h = harness(vec![(descriptor("alpha", 100, &[]), Script::Empty)]);

    let err = h
        .orchestrator
        .search_services("passeport", Some("ghost"), &options(10, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ProviderNotRegistered(ref id) if id == "ghost"));
    assert_eq!(h.calls(0), 0);
}

#[tokio::test]
async fn explicit_provider_failure_is_reported_as_is() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Fails(502)),
        (
            descriptor("beta", 50, &[]),
            Script::Serves(vec![service("beta", "B1", "Passeport")]),
        ),
    ]);

    let err = h
        .orchestrator
        .list_categories(Some("alpha"), None, true)
        .await
        .unwrap_err();
    match err {
        ToolError::ProviderOperation {
            provider_id,
            source,
        } => {
            assert_eq!(provider_id, "alpha");
            assert!(source.is_transient());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(h.calls(1), 0);
}

// ─── Details ────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_service_is_not_looked_up_at_other_providers() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Empty),
        (
            descriptor("beta", 50, &[]),
            Script::Serves(vec![service("beta", "101", "Patente")]),
        ),
    ]);

    let err = h
        .orchestrator
        .get_service_details("101", None, false)
        .await
        .unwrap_err();
    match err {
        ToolError::ProviderOperation {
            provider_id,
            source,
        } => {
            assert_eq!(provider_id, "alpha");
            assert!(source.is_not_found());
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let err = h
        .orchestrator
        .validate_service("101", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ToolError::ProviderOperation { ref source, .. } if source.is_not_found()
    ));
    assert_eq!(h.calls(1), 0);
}

#[tokio::test]
async fn details_move_on_after_upstream_failure() {
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Fails(503)),
        (
            descriptor("beta", 50, &[]),
            Script::Serves(vec![service("beta", "PS001", "Acte de naissance")]),
        ),
    ]);

    let answer = h
        .orchestrator
        .get_service_details("PS001", None, false)
        .await
        .unwrap();
    assert_eq!(answer.provider_id, "beta");
    assert_eq!(answer.value.title, "Acte de naissance");
    assert_eq!(answer.warnings.len(), 1);
    assert!(answer.warnings[0].starts_with("alpha: HTTP 503"));
}

#[tokio::test]
async fn details_fall_back_to_cached_record() {
    let mut seeded = RegistryState::new();
    seeded.set_service_details(
        "alpha",
        ServiceDetails::new("PS009", "Légalisation", "https://alpha.test/PS009", "alpha"),
    );
    let h = harness_with(
        vec![(descriptor("alpha", 100, &[]), Script::Fails(503))],
        shared_state(seeded),
        CountingPersister::default(),
    );

    let answer = h
        .orchestrator
        .get_service_details("PS009", None, true)
        .await
        .unwrap();
    assert_eq!(answer.source, DataSource::Cache);
    assert_eq!(answer.value.title, "Légalisation");

    // validation never settles for cached data
    let err = h
        .orchestrator
        .validate_service("PS009", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::ProviderAggregateFailure { .. }));
}

#[tokio::test]
async fn explicit_unknown_service_keeps_not_found() {
    let h = harness(vec![(descriptor("alpha", 100, &[]), Script::Empty)]);

    let err = h
        .orchestrator
        .get_service_details("PS404", Some("alpha"), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ToolError::ProviderOperation { ref source, .. } if source.is_not_found()
    ));
}

// ─── Persistence ────────────────────────────────────────────────────

#[tokio::test]
async fn persistence_failure_becomes_a_warning() {
    let h = harness_with(
        vec![(
            descriptor("alpha", 100, &[]),
            Script::Serves(vec![service("alpha", "PS001", "Passeport")]),
        )],
        shared_state(RegistryState::new()),
        CountingPersister {
            fail: true,
            ..CountingPersister::default()
        },
    );

    let answer = h
        .orchestrator
        .search_services("passeport", None, &options(10, 0))
        .await
        .unwrap();
    assert_eq!(answer.value.results.len(), 1);
    assert_eq!(
        answer.warnings,
        vec!["persistence: snapshot writer task failed: disk full"]
    );
    assert_eq!(h.persist_calls(), 1);
}

#[tokio::test]
async fn live_answers_reach_the_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state(RegistryState::new());
    let store = Arc::new(RegistryStore::new(dir.path().join("registry.json")));

    let provider = Arc::new(ScriptedProvider::new("alpha", Script::Empty));
    let mut registry = ProviderRegistry::new();
    registry
        .register(provider, descriptor("alpha", 100, &[]))
        .unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        state.clone(),
        Some(Arc::new(StatePersister::new(store.clone(), state.clone()))),
    );

    state_categories(&state, "alpha", "justice");
    orchestrator
        .list_categories(None, None, true)
        .await
        .unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert!(loaded.catalog("alpha").unwrap().categories().contains_key("justice"));
}

fn state_categories(state: &SharedState, provider_id: &str, category_id: &str) {
    write_state(state).update_categories(
        provider_id,
        &[category(provider_id, category_id)],
        true,
    );
}

// ─── Concurrency ────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_searches_all_succeed() {
    let h = harness(vec![(
        descriptor("alpha", 100, &[]),
        Script::Serves(vec![
            service("alpha", "PS001", "Passeport"),
            service("alpha", "PS002", "Visa"),
        ]),
    )]);

    let searches = (0..5).map(|_| {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            orchestrator
                .search_services("passeport", None, &options(10, 0))
                .await
        })
    });
    for handle in futures::future::join_all(searches).await {
        let answer = handle.unwrap().unwrap();
        assert_eq!(answer.value.total_results, 2);
    }
    assert_eq!(h.calls(0), 5);
    assert!(read_state(h.orchestrator.state()).catalog("alpha").is_none());
}

// ─── Tools ──────────────────────────────────────────────────────────

#[tokio::test]
async fn tools_wrap_answers_in_envelopes() {
    let services: Vec<ServiceSummary> = (0..12)
        .map(|i| service("beta", &format!("PS{:03}", i), "Passeport"))
        .collect();
    let h = harness(vec![
        (descriptor("alpha", 100, &[]), Script::Fails(503)),
        (descriptor("beta", 50, &[]), Script::Serves(services)),
    ]);
    let tools = ToolRegistry::with_builtins();
    let ctx = ToolContext::new(h.orchestrator.clone());

    let page = tools
        .execute(
            "search_services",
            json!({ "query": "passeport", "limit": 5, "offset": 5 }),
            &ctx,
        )
        .await
        .unwrap();
    assert_eq!(page["provider_id"], "beta");
    assert_eq!(page["source"], "live");
    assert_eq!(page["total_results"], 12);
    assert_eq!(page["next_offset"], 10);
    assert_eq!(page["results"].as_array().unwrap().len(), 5);
    assert!(page["warnings"][0].as_str().unwrap().starts_with("alpha: HTTP 503"));

    let providers = tools
        .execute("list_providers", Value::Null, &ctx)
        .await
        .unwrap();
    assert_eq!(providers["providers"][0]["id"], "alpha");

    let status = tools
        .execute("get_scraper_status", json!({ "provider_id": "beta" }), &ctx)
        .await
        .unwrap();
    assert_eq!(status["providers"][0]["status"]["calls"], 1);

    let err = tools
        .execute("search_services", json!({ "query": "  " }), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
}
