//! Stdio transport for MCP servers
//!
//! The server is spawned as a subprocess and speaks newline-delimited
//! JSON-RPC over its stdin/stdout. Stderr is drained into the log.

mod config;
mod lifecycle;
mod reader;
mod transport;

pub use config::{DANGEROUS_ENV_VARS, DEFAULT_MAX_BUFFER_SIZE};
pub use transport::StdioTransport;
