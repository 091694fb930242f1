//! HTTP transport.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | All tools with their input schemas |
//! | `POST` | `/tools/{name}` | Call a tool; the body is its argument object |
//! | `GET`  | `/health` | Liveness plus fetch statistics |
//! | `*`    | `/mcp` | MCP streamable HTTP endpoint |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "provider_failure", "message": "…", "warnings": ["…"] } }
//! ```
//!
//! | Code | Status | Raised for |
//! |------|--------|------------|
//! | `bad_request` | 400 | invalid arguments |
//! | `not_registered` | 404 | unknown `provider_id` |
//! | `not_found` | 404 | unknown tool, or unknown service at an explicit provider |
//! | `provider_failure` | 502 | no provider could answer |
//! | `tool_error` | 500 | anything else |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::bootstrap::AppContext;
use crate::error::ToolError;
use crate::health::{HealthMonitor, HealthSummary};
use crate::mcp::McpBridge;
use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
    health: Arc<HealthMonitor>,
}

/// Build the router without binding a socket.
pub fn router(app: &AppContext) -> Router {
    let state = AppState {
        tools: app.tools.clone(),
        ctx: app.tool_context(),
        health: app.health.clone(),
    };

    let bridge = McpBridge::new(app.tools.clone(), app.tool_context());
    let mcp_service = StreamableHttpService::new(
        move || Ok(bridge.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .nest_service("/mcp", mcp_service)
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until Ctrl-C.
pub async fn run_server(app: &AppContext) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, tools = app.tools.len(), "HTTP server listening");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    warnings: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
                warnings: self.warnings,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ToolError> for AppError {
    fn from(err: ToolError) -> Self {
        let (status, code) = match &err {
            ToolError::InvalidArguments(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ToolError::ProviderNotRegistered(_) => (StatusCode::NOT_FOUND, "not_registered"),
            ToolError::UnknownTool(_) => (StatusCode::NOT_FOUND, "not_found"),
            ToolError::ProviderOperation { source, .. } if source.is_not_found() => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ToolError::ProviderOperation { .. } | ToolError::ProviderAggregateFailure { .. } => {
                (StatusCode::BAD_GATEWAY, "provider_failure")
            }
            ToolError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "tool_error"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
            warnings: err.warnings().to_vec(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    fetches: HealthSummary,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        fetches: state.health.summary(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let result = state.tools.execute(&name, params, &state.ctx).await?;
    Ok(Json(serde_json::json!({ "result": result })))
}
