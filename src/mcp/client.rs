//! Single MCP server connection: transport setup, tool discovery, and a
//! `ToolHandler` wrapper so discovered tools slot straight into the
//! `ToolRegistry`. Grounded on `neuron-mcp`'s `McpClient`/`McpToolWrapper`,
//! adapted to this crate's `ToolHandler` (`Result<String, String>`) instead
//! of `ToolDyn`.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, Content, RawContent, Tool as McpTool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use serde_json::Value;

use super::config::{ServerConfig, Transport};
use crate::error::MCPError;
use crate::tools::ToolHandler;

pub struct McpClient {
    server_name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpClient {
    pub async fn connect(config: &ServerConfig, headers: Vec<(String, String)>) -> Result<Self, MCPError> {
        let service = match &config.transport {
            Transport::Stdio { command, args } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args);
                let transport = TokioChildProcess::new(cmd)
                    .map_err(|e| mcp_err(&config.name, None, e.to_string()))?;
                ().serve(transport)
                    .await
                    .map_err(|e| mcp_err(&config.name, None, e.to_string()))?
            }
            Transport::Sse { url } => {
                let transport = if headers.is_empty() {
                    StreamableHttpClientTransport::from_uri(url.as_str())
                } else {
                    let mut header_map = reqwest::header::HeaderMap::new();
                    for (k, v) in &headers {
                        if let (Ok(name), Ok(value)) = (
                            reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                            reqwest::header::HeaderValue::from_str(v),
                        ) {
                            header_map.insert(name, value);
                        }
                    }
                    let client = reqwest::Client::builder()
                        .default_headers(header_map)
                        .build()
                        .map_err(|e| mcp_err(&config.name, Some(url), e.to_string()))?;
                    StreamableHttpClientTransport::with_client(client, url.as_str())
                };
                ().serve(transport)
                    .await
                    .map_err(|e| mcp_err(&config.name, Some(url), e.to_string()))?
            }
        };

        Ok(Self { server_name: config.name.clone(), service })
    }

    pub async fn discover_tools(&self, prefix: Option<&str>) -> Result<Vec<(String, Box<dyn ToolHandler>, Value)>, MCPError> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| mcp_err(&self.server_name, None, e.to_string()))?;

        let peer = Arc::new(self.service.peer().clone());

        Ok(tools
            .into_iter()
            .map(|tool| {
                let local_name = match prefix {
                    Some(p) => format!("{p}_{}", tool.name),
                    None => tool.name.to_string(),
                };
                let schema = tool_schema(&tool, &local_name);
                let handler: Box<dyn ToolHandler> =
                    Box::new(McpToolHandler::new(tool, Arc::clone(&peer)));
                (local_name, handler, schema)
            })
            .collect())
    }

    pub async fn close(self) -> Result<(), MCPError> {
        self.service
            .cancel()
            .await
            .map_err(|e| mcp_err(&self.server_name, None, e.to_string()))?;
        Ok(())
    }
}

fn mcp_err(server_name: &str, url: Option<&str>, message: String) -> MCPError {
    MCPError { server_name: server_name.to_string(), url: url.map(str::to_string), message }
}

fn tool_schema(tool: &McpTool, local_name: &str) -> Value {
    let input_schema = serde_json::to_value(&*tool.input_schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
    serde_json::json!({
        "name": local_name,
        "description": tool.description.as_deref().unwrap_or(""),
        "input_schema": input_schema,
    })
}

struct McpToolHandler {
    tool_name: String,
    peer: Arc<Peer<RoleClient>>,
}

impl McpToolHandler {
    fn new(tool: McpTool, peer: Arc<Peer<RoleClient>>) -> Self {
        Self { tool_name: tool.name.to_string(), peer }
    }
}

#[async_trait]
impl ToolHandler for McpToolHandler {
    async fn call(&self, input: &Value) -> Result<String, String> {
        let params = CallToolRequestParams {
            meta: None,
            name: self.tool_name.clone().into(),
            arguments: input.as_object().cloned(),
            task: None,
        };

        let result: CallToolResult = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| e.to_string())?;

        if result.is_error == Some(true) {
            return Err(extract_text(&result.content));
        }

        if let Some(structured) = result.structured_content {
            return Ok(structured.to_string());
        }

        Ok(extract_text(&result.content))
    }
}

fn extract_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
