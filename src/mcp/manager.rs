//! MCP Client Manager (spec §4.G): attach configured servers' tools into a
//! `ToolRegistry`. Grounded on `mamba_agents/mcp/client.py`'s
//! `MCPClientManager`, which itself documents `as_toolsets()` as the
//! supported path and `connect_all`/`disconnect_all`/`get_toolsets` as
//! deprecated in favor of it (see Open Question 1 in DESIGN.md — the
//! deprecated explicit-lifecycle path is not implemented here at all).

use std::collections::HashMap;

use super::auth::build_auth_headers;
use super::client::McpClient;
use super::config::ServerConfig;
use crate::error::{ConfigurationError, MCPError};
use crate::tools::handler::ToolDef;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Error,
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    pub error: Option<String>,
    pub tool_count: usize,
}

/// Whether this manager has committed to the attach-as-toolset lifecycle.
/// Set on the first successful `attach`; any later attempt to reuse the
/// manager for a second, independent attach cycle on the same server name
/// is rejected rather than silently reconnecting.
#[derive(Debug, Default)]
struct LifecycleGuard {
    attached_servers: HashMap<String, ()>,
}

pub struct MCPClientManager {
    configs: Vec<ServerConfig>,
    clients: Vec<McpClient>,
    statuses: HashMap<String, ServerStatus>,
    guard: LifecycleGuard,
}

impl MCPClientManager {
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        Self { configs, clients: Vec::new(), statuses: HashMap::new(), guard: LifecycleGuard::default() }
    }

    pub fn add_server(&mut self, config: ServerConfig) {
        self.configs.push(config);
    }

    /// Connects every configured server, discovers its tools, and registers
    /// them into `registry` (grouped by server name so `set_group_enabled`
    /// can toggle a whole server's tools at once). Returns once all servers
    /// have been attempted; a single server's failure is recorded in its
    /// status and surfaced in the returned `Vec`, but does not abort the
    /// others (spec §4.G: "connection failure ... without aborting the run").
    pub async fn attach(&mut self, registry: &mut ToolRegistry) -> Vec<MCPError> {
        let mut errors = Vec::new();
        let configs = self.configs.clone();

        for config in &configs {
            if self.guard.attached_servers.contains_key(&config.name) {
                errors.push(MCPError {
                    server_name: config.name.clone(),
                    url: None,
                    message: ConfigurationError {
                        config_key: "mcp_lifecycle".into(),
                        expected: "attach each configured server exactly once".into(),
                        actual: "attach() called again for an already-attached server".into(),
                    }
                    .to_string(),
                });
                continue;
            }

            match self.attach_one(config, registry).await {
                Ok(tool_count) => {
                    self.guard.attached_servers.insert(config.name.clone(), ());
                    self.statuses.insert(
                        config.name.clone(),
                        ServerStatus {
                            name: config.name.clone(),
                            state: ServerState::Running,
                            error: None,
                            tool_count,
                        },
                    );
                }
                Err(e) => {
                    self.statuses.insert(
                        config.name.clone(),
                        ServerStatus {
                            name: config.name.clone(),
                            state: ServerState::Error,
                            error: Some(e.message.clone()),
                            tool_count: 0,
                        },
                    );
                    errors.push(e);
                }
            }
        }

        errors
    }

    async fn attach_one(&mut self, config: &ServerConfig, registry: &mut ToolRegistry) -> Result<usize, MCPError> {
        let headers = match &config.auth {
            Some(auth) => build_auth_headers(auth).map_err(|e| MCPError {
                server_name: config.name.clone(),
                url: None,
                message: e.to_string(),
            })?,
            None => Vec::new(),
        };

        let client = McpClient::connect(config, headers).await?;
        let tools = client.discover_tools(config.tool_prefix.as_deref()).await?;
        let count = tools.len();

        for (name, handler, schema) in tools {
            registry.register(ToolDef {
                name,
                schema,
                group: Some(config.name.clone()),
                enabled: true,
                handler,
            });
        }

        self.clients.push(client);
        Ok(count)
    }

    /// Disconnects every attached server and removes its tools from
    /// `registry`. Consumes `self`: per the supported lifecycle, a manager
    /// is attached once and detached once.
    pub async fn detach(self, registry: &mut ToolRegistry) {
        for name in self.guard.attached_servers.keys() {
            registry.remove_group(name);
        }
        for client in self.clients {
            let _ = client.close().await;
        }
    }

    pub fn status(&self, name: &str) -> Option<&ServerStatus> {
        self.statuses.get(name)
    }

    pub fn all_statuses(&self) -> Vec<&ServerStatus> {
        self.statuses.values().collect()
    }

    pub fn configs(&self) -> &[ServerConfig] {
        &self.configs
    }
}
