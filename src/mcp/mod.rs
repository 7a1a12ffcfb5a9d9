//! MCP Client Manager (spec §4.G): configuration, auth, and the
//! attach-as-toolset lifecycle (see DESIGN.md Open Question 1 for why the
//! deprecated explicit connect/disconnect lifecycle is not implemented).

pub mod auth;
pub mod client;
pub mod config;
pub mod manager;

pub use client::McpClient;
pub use config::{MCPAuthConfig, ServerConfig, Transport};
pub use manager::{MCPClientManager, ServerState, ServerStatus};
