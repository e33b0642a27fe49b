//! JSON-RPC 2.0 layer used to talk to MCP servers
//!
//! - [`RpcClient`] - request/response correlation over any [`Transport`](crate::transport::Transport)
//! - [`messages`] - envelope types
//! - [`capabilities`] - `initialize` handshake types

pub mod capabilities;
mod client;
pub mod messages;

pub use capabilities::{Implementation, InitializeResult, PROTOCOL_VERSION, ServerCapabilities};
pub use client::RpcClient;
pub use messages::{
    IncomingMessage, JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
