//! Type definitions for the agent execution core
//!
//! - [`identifiers`] - Type-safe ID wrappers (`JobId`, `SessionId`, `MessageId`)
//! - [`mcp`] - MCP server configuration
//! - [`messages`] - Message and content part types
//! - [`session`] - Conversation sessions
//! - [`options`] - Component options and builders

pub mod identifiers;
pub mod mcp;
pub mod messages;
pub mod options;
pub mod session;

// Re-export commonly used types
pub use identifiers::{JobId, MessageId, SessionId};
pub use mcp::{McpHttpServerConfig, McpServerConfig, McpServers, McpStdioServerConfig, McpTransportConfig};
pub use messages::{ContentPart, CreateMessageParams, FinishReason, Message, MessageRole, ToolCall, ToolResult};
pub use options::{JobManagerOptions, JobManagerOptionsBuilder, ShellOptions, ShellOptionsBuilder};
pub use session::Session;
