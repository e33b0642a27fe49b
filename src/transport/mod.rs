//! Transport layer for talking to MCP servers
//!
//! A transport moves newline-free JSON documents in both directions. The
//! [`RpcClient`](crate::rpc::RpcClient) owns one transport and layers
//! request/response correlation on top.

pub mod subprocess;

#[cfg(feature = "http")]
pub mod http;

use tokio::sync::mpsc;

use crate::error::Result;

/// Bidirectional JSON message channel to one server
pub trait Transport: Send + Sync {
    /// Connect to the transport
    ///
    /// # Errors
    /// Returns error if connection fails
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write one serialized JSON-RPC message
    ///
    /// # Errors
    /// Returns error if write fails or transport is not ready
    fn write(&mut self, data: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// End the input stream (close stdin)
    ///
    /// # Errors
    /// Returns error if closing fails
    fn end_input(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Take the stream of messages sent by the server
    ///
    /// Spawns a background reader on first call; later calls return an
    /// already-closed receiver. The receiver closes when the server goes away.
    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if cleanup fails
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;
pub use subprocess::StdioTransport;
