//! # Agent Execution Core
//!
//! The runtime pieces a code generation agent needs to act on a machine:
//! running shell commands, tracking long-running jobs, calling tools on MCP
//! servers, and keeping conversation state, all safe to drive concurrently
//! from an agent loop and a UI.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kodegen_agent_core::shell::PersistentShell;
//! use kodegen_agent_core::types::ShellOptions;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> kodegen_agent_core::Result<()> {
//!     let shell = PersistentShell::new(ShellOptions::default())?;
//!     let cancel = CancellationToken::new();
//!
//!     let output = shell.execute("echo hi", None, &cancel).await?;
//!     assert_eq!(output.stdout, "hi\n");
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Persistent Shell with [`PersistentShell`]
//!
//! Commands run one at a time, in submission order. Working directory and
//! exported variables carry over from one command to the next. Every call
//! takes a timeout and a `CancellationToken`; an interrupted command returns
//! [`CoreError::Interrupted`] with the output captured so far.
//!
//! ### 2. Background Jobs with [`BackgroundJobManager`]
//!
//! ```no_run
//! # use kodegen_agent_core::shell::BackgroundJobManager;
//! # use kodegen_agent_core::types::JobManagerOptions;
//! # use tokio_util::sync::CancellationToken;
//! # async fn example() -> kodegen_agent_core::Result<()> {
//! let jobs = BackgroundJobManager::new(JobManagerOptions::default())?;
//! let job = jobs.start(&CancellationToken::new(), None, "npm run dev", "dev server")?;
//!
//! let output = jobs.get_output(job.id())?;
//! println!("{}", output.stdout);
//! jobs.kill(job.id()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Output is kept in [`BoundedBuffer`]s that retain the most recent bytes.
//!
//! ### 3. MCP Tool Servers with [`McpRegistry`]
//!
//! One session per configured server, reconnected on use, with cached tool
//! and resource inventories. See the [`mcp`] module.
//!
//! ### 4. Events with [`Broker`]
//!
//! Every component publishes typed events on a [`Broker`]. Publishing never
//! blocks; slow subscribers lose events instead.
//!
//! ### 5. Conversation State
//!
//! [`SessionStore`] and [`MessageStore`] hold sessions and their ordered
//! messages. Everything they return is a copy.
//!
//! ## Architecture
//!
//! - [`shell`]: persistent shell, background jobs, output buffers
//! - [`mcp`]: server registry, sessions, tool results
//! - [`rpc`]: JSON-RPC client and MCP handshake types
//! - [`transport`]: stdio and HTTP transports
//! - [`pubsub`]: generic event broker
//! - [`store`]: session and message stores
//! - [`types`]: identifiers, messages, configuration and options
//! - [`error`]: error types
//!
//! ## Feature Flags
//!
//! - `http` - Enables the streamable HTTP transport (requires `reqwest`)
//!
//! ## Error Handling
//!
//! All fallible operations return [`Result<T, CoreError>`](Result):
//!
//! ```no_run
//! # use kodegen_agent_core::{CoreError, shell::PersistentShell, types::ShellOptions};
//! # use tokio_util::sync::CancellationToken;
//! # use std::time::Duration;
//! # async fn example(shell: PersistentShell) {
//! let cancel = CancellationToken::new();
//! match shell.execute("sleep 10", Some(Duration::from_secs(1)), &cancel).await {
//!     Ok(output) => println!("exit {}", output.exit_code),
//!     Err(CoreError::Interrupted { output }) => {
//!         log::warn!("interrupted after {} bytes", output.stdout.len());
//!     }
//!     Err(e) => log::error!("Error: {e}"),
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mcp;
pub mod pubsub;
pub mod rpc;
pub mod shell;
pub mod store;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use error::{CoreError, Result};
pub use mcp::{ConnectionState, Connector, McpEvent, McpRegistry, RpcConnector, ToolSession};
pub use pubsub::{BackpressureStrategy, Broker, Event, EventType, Subscription};
pub use rpc::RpcClient;
pub use shell::{
    BackgroundJob, BackgroundJobManager, BlockFunc, BoundedBuffer, CommandOutput, JobEvent,
    PersistentShell,
};
pub use store::{MessageRepository, MessageStore, SessionStore};
pub use transport::{StdioTransport, Transport};

pub use types::identifiers::{JobId, MessageId, SessionId};
pub use types::mcp::{McpServerConfig, McpServers};
pub use types::messages::{ContentPart, CreateMessageParams, Message, MessageRole};
pub use types::options::{JobManagerOptions, ShellOptions};
pub use types::session::Session;

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
