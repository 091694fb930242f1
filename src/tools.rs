//! The tool surface exposed to agents.
//!
//! Each [`Tool`] parses a flat JSON argument object, calls the
//! [`Orchestrator`] through a [`ToolContext`], and returns a flat JSON
//! result. Transports (HTTP, MCP) only ever talk to the [`ToolRegistry`].
//!
//! | Tool | Orchestrator call |
//! |------|-------------------|
//! | `list_categories` | [`Orchestrator::list_categories`] |
//! | `search_services` | [`Orchestrator::search_services`] |
//! | `get_service_details` | [`Orchestrator::get_service_details`] |
//! | `validate_service` | [`Orchestrator::validate_service`] |
//! | `get_scraper_status` | [`Orchestrator::scraper_status`] |
//! | `list_providers` | [`Orchestrator::list_providers`] |

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ToolError;
use crate::orchestrator::{Answer, Orchestrator};
use crate::provider::SearchOptions;

pub const DEFAULT_LIMIT: usize = 10;

/// A named operation agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name, e.g. `POST /tools/search_services`.
    fn name(&self) -> &str;

    /// One line shown during discovery.
    fn description(&self) -> &str;

    /// JSON Schema of the argument object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    orchestrator: Arc<Orchestrator>,
}

impl ToolContext {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Decode an argument object; `null` counts as `{}`.
fn parse_args<T: DeserializeOwned>(params: Value) -> Result<T, ToolError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Common response head: `provider_id`, `source`, and `warnings` when any.
fn envelope<T>(answer: &Answer<T>, mut body: Value) -> Value {
    body["provider_id"] = json!(answer.provider_id);
    body["source"] = json!(answer.source);
    if !answer.warnings.is_empty() {
        body["warnings"] = json!(answer.warnings);
    }
    body
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Internal(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListCategoriesArgs {
    provider_id: Option<String>,
    parent_id: Option<String>,
    #[serde(default)]
    refresh: bool,
}

pub struct ListCategoriesTool;

#[async_trait]
impl Tool for ListCategoriesTool {
    fn name(&self) -> &str {
        "list_categories"
    }

    fn description(&self) -> &str {
        "List service categories, optionally under a parent category"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "provider_id": { "type": "string", "description": "Restrict to one provider" },
                "parent_id": { "type": "string", "description": "Only children of this category" },
                "refresh": { "type": "boolean", "default": false }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: ListCategoriesArgs = parse_args(params)?;
        let answer = ctx
            .orchestrator()
            .list_categories(args.provider_id.as_deref(), args.parent_id.as_deref(), args.refresh)
            .await?;
        let categories = to_value(&answer.value)?;
        Ok(envelope(&answer, json!({ "categories": categories })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchServicesArgs {
    query: String,
    provider_id: Option<String>,
    category_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    refresh: bool,
}

pub struct SearchServicesTool;

#[async_trait]
impl Tool for SearchServicesTool {
    fn name(&self) -> &str {
        "search_services"
    }

    fn description(&self) -> &str {
        "Search public services across providers"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms" },
                "provider_id": { "type": "string", "description": "Restrict to one provider" },
                "category_id": { "type": "string", "description": "Only services in this category" },
                "limit": { "type": "integer", "minimum": 1, "default": DEFAULT_LIMIT },
                "offset": { "type": "integer", "minimum": 0, "default": 0 },
                "refresh": { "type": "boolean", "default": false }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: SearchServicesArgs = parse_args(params)?;
        require_non_empty("query", &args.query)?;
        if args.limit == 0 {
            return Err(ToolError::InvalidArguments("limit must be at least 1".into()));
        }

        let options = SearchOptions {
            category_id: args.category_id,
            limit: Some(args.limit),
            offset: args.offset,
            refresh: args.refresh,
        };
        let answer = ctx
            .orchestrator()
            .search_services(&args.query, args.provider_id.as_deref(), &options)
            .await?;

        let page = &answer.value;
        let results: Vec<_> = page.results.iter().take(args.limit).collect();
        let next = args.offset + results.len();
        let next_offset = (next < page.total_results).then_some(next);

        let body = json!({
            "results": to_value(&results)?,
            "limit": args.limit,
            "offset": args.offset,
            "total_results": page.total_results,
            "next_offset": next_offset,
        });
        Ok(envelope(&answer, body))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceDetailsArgs {
    service_id: String,
    provider_id: Option<String>,
    #[serde(default)]
    refresh: bool,
}

pub struct GetServiceDetailsTool;

#[async_trait]
impl Tool for GetServiceDetailsTool {
    fn name(&self) -> &str {
        "get_service_details"
    }

    fn description(&self) -> &str {
        "Full details of one public service"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string", "description": "Provider-scoped service id" },
                "provider_id": { "type": "string", "description": "Provider that owns the id" },
                "refresh": { "type": "boolean", "default": false }
            },
            "required": ["service_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: ServiceDetailsArgs = parse_args(params)?;
        require_non_empty("service_id", &args.service_id)?;
        let answer = ctx
            .orchestrator()
            .get_service_details(&args.service_id, args.provider_id.as_deref(), args.refresh)
            .await?;
        let service = to_value(&answer.value)?;
        Ok(envelope(&answer, json!({ "service": service })))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateServiceArgs {
    service_id: String,
    provider_id: Option<String>,
}

pub struct ValidateServiceTool;

#[async_trait]
impl Tool for ValidateServiceTool {
    fn name(&self) -> &str {
        "validate_service"
    }

    fn description(&self) -> &str {
        "Re-fetch a service live from its source and confirm it still exists"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string", "description": "Provider-scoped service id" },
                "provider_id": { "type": "string", "description": "Provider that owns the id" }
            },
            "required": ["service_id"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: ValidateServiceArgs = parse_args(params)?;
        require_non_empty("service_id", &args.service_id)?;
        let answer = ctx
            .orchestrator()
            .validate_service(&args.service_id, args.provider_id.as_deref())
            .await?;
        let service = to_value(&answer.value)?;
        Ok(envelope(
            &answer,
            json!({ "service": service, "validated": true }),
        ))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProviderFilterArgs {
    provider_id: Option<String>,
}

pub struct ScraperStatusTool;

#[async_trait]
impl Tool for ScraperStatusTool {
    fn name(&self) -> &str {
        "get_scraper_status"
    }

    fn description(&self) -> &str {
        "Provider health, fetch statistics, and catalog sizes"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "provider_id": { "type": "string", "description": "Restrict to one provider" }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let args: ProviderFilterArgs = parse_args(params)?;
        ctx.orchestrator()
            .scraper_status(args.provider_id.as_deref())
            .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

pub struct ListProvidersTool;

#[async_trait]
impl Tool for ListProvidersTool {
    fn name(&self) -> &str {
        "list_providers"
    }

    fn description(&self) -> &str {
        "Registered providers with their priority and coverage"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let _: NoArgs = parse_args(params)?;
        let providers = ctx.orchestrator().list_providers();
        Ok(json!({ "providers": to_value(&providers)? }))
    }
}

/// Registry of callable tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding the six built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ListCategoriesTool));
        registry.register(Box::new(SearchServicesTool));
        registry.register(Box::new(GetServiceDetailsTool));
        registry.register(Box::new(ValidateServiceTool));
        registry.register(Box::new(ScraperStatusTool));
        registry.register(Box::new(ListProvidersTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Run a tool by name, logging the outcome and duration.
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let start = Instant::now();
        let result = tool.execute(params, ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(tool = name, elapsed_ms, "tool call succeeded"),
            Err(err) => tracing::warn!(tool = name, elapsed_ms, error = %err, "tool call failed"),
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
