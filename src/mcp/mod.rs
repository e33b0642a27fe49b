//! MCP tool servers
//!
//! [`McpRegistry`] keeps one session per configured server and exposes their
//! tools and resources to the agent:
//!
//! ```no_run
//! use kodegen_agent_core::mcp::{McpRegistry, RpcConnector};
//! use kodegen_agent_core::types::{McpServerConfig, McpServers};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> kodegen_agent_core::Result<()> {
//! let mut servers = McpServers::new();
//! servers.insert(
//!     "fs".to_string(),
//!     McpServerConfig::stdio("mcp-server-filesystem", vec!["/tmp".to_string()]),
//! );
//!
//! let registry = McpRegistry::new(RpcConnector::new(), servers);
//! let cancel = CancellationToken::new();
//! registry.initialize(&cancel).await;
//!
//! let result = registry
//!     .run_tool("fs", "read_file", r#"{"path": "/tmp/notes.txt"}"#, &cancel)
//!     .await?;
//! println!("{}", result.content());
//! registry.close_all().await;
//! # Ok(())
//! # }
//! ```

pub mod protocol;
mod registry;
mod result;
mod session;
mod state;

pub use protocol::{CallToolResult, ContentBlock, Resource, ResourceContents, Tool};
pub use registry::{McpRegistry, QualifiedTool, TOOL_NAME_PREFIX, qualified_tool_name};
pub use result::{ToolResult, ensure_base64, is_valid_base64};
pub use session::{Connector, RpcConnector, RpcSession, ToolSession};
pub use state::{ConnectionInfo, ConnectionState, Counts, McpEvent, McpEventKind};
