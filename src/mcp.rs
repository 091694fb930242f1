//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools via `list_tools` /
//! `call_tool`. The same bridge serves the `/mcp` streamable HTTP endpoint
//! and the stdio transport.

use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};

use crate::bootstrap::AppContext;
use crate::tools::{ToolContext, ToolRegistry};

/// Each MCP session receives a clone; everything is behind `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    /// MCP view of a registry tool. Every tool here only reads upstream data.
    fn describe(tool: &dyn crate::tools::Tool) -> Tool {
        let schema = match tool.parameters_schema() {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Tool {
            name: tool.name().to_string().into(),
            title: None,
            description: Some(tool.description().to_string().into()),
            input_schema: Arc::new(schema),
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "service-public-bj".to_string(),
                title: Some("Service Public BJ".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Beninese public-service directory. Use search_services to find a \
                 procedure, get_service_details for requirements, steps, and costs, and \
                 list_categories to browse. Responses name the provider that answered \
                 and whether the data is live or cached."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::describe(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::describe)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = serde_json::Value::Object(request.arguments.unwrap_or_default());
        let name: &str = &request.name;
        if self.tools.find(name).is_none() {
            return Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("unknown tool '{}'", name),
                None,
            ));
        }

        let outcome = self.tools.execute(name, arguments, &self.ctx).await;
        Ok(match outcome {
            Ok(result) => CallToolResult::success(vec![Content::text(result.to_string())]),
            Err(err) => {
                let mut lines = vec![err.to_string()];
                lines.extend(err.warnings().iter().map(|w| format!("- {}", w)));
                CallToolResult::error(vec![Content::text(lines.join("\n"))])
            }
        })
    }
}

/// Serve MCP over stdin/stdout until the client disconnects.
pub async fn run_stdio(app: &AppContext) -> anyhow::Result<()> {
    let bridge = McpBridge::new(app.tools.clone(), app.tool_context());
    tracing::info!(tools = app.tools.len(), "MCP stdio server starting");
    let service = bridge.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_tools_become_read_only_mcp_tools() {
        let registry = ToolRegistry::with_builtins();
        let search = registry.find("search_services").unwrap();
        let tool = McpBridge::describe(search);

        assert_eq!(tool.name, "search_services");
        assert_eq!(tool.input_schema["required"][0], "query");
        assert_eq!(
            tool.annotations.and_then(|a| a.read_only_hint),
            Some(true)
        );
    }
}
