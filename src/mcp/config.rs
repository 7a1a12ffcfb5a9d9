//! MCP server configuration (spec §4.G). Mirrors the server-config shape of
//! `mamba_agents/mcp/config.py`, adapted to Rust's enum-of-transports instead
//! of an optional-field struct with a string discriminant.

use serde::{Deserialize, Serialize};

/// Authentication for one MCP server. Only API-key auth is modeled, matching
/// `MCPAuthConfig` — bearer-token OAuth flows are out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MCPAuthConfig {
    /// Environment variable holding the key. Takes priority over `key` and
    /// is an error (not a silent skip) if set but unresolvable.
    #[serde(default)]
    pub key_env: Option<String>,
    /// A literal key, or a `${VAR_NAME}` reference resolved against the
    /// environment.
    #[serde(default)]
    pub key: Option<String>,
    /// HTTP header to carry the resolved key on. Defaults to `Authorization`,
    /// in which case a missing `Bearer ` prefix is added automatically.
    #[serde(default = "default_auth_header")]
    pub header: String,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

impl Default for MCPAuthConfig {
    fn default() -> Self {
        Self { key_env: None, key: None, header: default_auth_header() }
    }
}

/// Transport-specific connection details for one MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Transport {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    Sse {
        url: String,
    },
}

/// One configured MCP server (spec §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: Transport,
    #[serde(default)]
    pub auth: Option<MCPAuthConfig>,
    /// Prefix applied to every tool name discovered from this server, to
    /// avoid collisions between servers exposing a tool of the same name.
    #[serde(default)]
    pub tool_prefix: Option<String>,
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Stdio { command: command.into(), args },
            auth: None,
            tool_prefix: None,
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Sse { url: url.into() },
            auth: None,
            tool_prefix: None,
        }
    }

    pub fn with_auth(mut self, auth: MCPAuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tool_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tool_prefix = Some(prefix.into());
        self
    }

    pub fn prefixed(&self, tool_name: &str) -> String {
        match &self.tool_prefix {
            Some(prefix) => format!("{prefix}_{tool_name}"),
            None => tool_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_joins_with_underscore() {
        let cfg = ServerConfig::stdio("fs", "npx", vec![]).with_tool_prefix("fs");
        assert_eq!(cfg.prefixed("read_file"), "fs_read_file");
    }

    #[test]
    fn prefixed_passthrough_without_prefix() {
        let cfg = ServerConfig::stdio("fs", "npx", vec![]);
        assert_eq!(cfg.prefixed("read_file"), "read_file");
    }
}
