//! MCP (Model Context Protocol) server configuration types
//!
//! Configuration is loaded elsewhere; this module only defines the shape the
//! registry consumes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default per-server timeout for connects and pings
pub const DEFAULT_SERVER_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// MCP Server Types
// ============================================================================

/// MCP stdio server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpStdioServerConfig {
    /// Command to execute
    pub command: String,
    /// Command arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// MCP HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpHttpServerConfig {
    /// Server URL
    pub url: String,
    /// HTTP headers
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

/// How to reach an MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransportConfig {
    /// Spawned subprocess speaking JSON-RPC over stdio
    Stdio(McpStdioServerConfig),
    /// JSON-RPC over HTTP POST
    Http(McpHttpServerConfig),
}

/// Full configuration for one named MCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Transport settings
    #[serde(flatten)]
    pub transport: McpTransportConfig,
    /// Server is configured but must not be started
    #[serde(default)]
    pub disabled: bool,
    /// Tool names hidden from the agent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
    /// Connect/ping timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl McpServerConfig {
    /// Stdio server config
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            transport: McpTransportConfig::Stdio(McpStdioServerConfig {
                command: command.into(),
                args,
                env: HashMap::new(),
            }),
            disabled: false,
            disabled_tools: Vec::new(),
            timeout_secs: None,
        }
    }

    /// HTTP server config
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: McpTransportConfig::Http(McpHttpServerConfig {
                url: url.into(),
                headers: HashMap::new(),
            }),
            disabled: false,
            disabled_tools: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Effective timeout for connecting and pinging
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_SERVER_TIMEOUT_SECS),
        )
    }

    /// Whether a tool is hidden by configuration
    #[must_use]
    pub fn is_tool_disabled(&self, tool_name: &str) -> bool {
        self.disabled_tools.iter().any(|t| t == tool_name)
    }
}

/// Named MCP server configurations
pub type McpServers = HashMap<String, McpServerConfig>;
