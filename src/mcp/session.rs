//! Tool sessions and the connectors that open them
//!
//! [`ToolSession`] is the seam between the registry and the wire: the
//! registry only ever sees this trait, so tests can substitute an in-memory
//! server. [`RpcSession`] is the production implementation on top of
//! [`RpcClient`].

use serde_json::{Value, json};
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::rpc::{InitializeResult, RpcClient, ServerCapabilities, capabilities::initialize_params};
use crate::transport::{StdioTransport, Transport};
use crate::types::mcp::{McpServerConfig, McpTransportConfig};

use super::protocol::{
    CallToolResult, ListResourcesResult, ListToolsResult, ReadResourceResult, Resource,
    ResourceContents, Tool,
};

/// An initialized connection to one tool server
pub trait ToolSession: Send + Sync + 'static {
    /// Capabilities from the `initialize` result
    fn capabilities(&self) -> ServerCapabilities;

    /// Liveness check
    ///
    /// # Errors
    /// Returns error if the server does not answer
    fn ping(&self, cancel: &CancellationToken) -> impl Future<Output = Result<()>> + Send;

    /// Every tool the server offers
    ///
    /// # Errors
    /// Returns error if the request fails
    fn list_tools(&self, cancel: &CancellationToken)
    -> impl Future<Output = Result<Vec<Tool>>> + Send;

    /// Every resource the server offers
    ///
    /// # Errors
    /// Returns error if the request fails
    fn list_resources(
        &self,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<Resource>>> + Send;

    /// Invoke a tool
    ///
    /// # Errors
    /// Returns error if the request fails
    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<CallToolResult>> + Send;

    /// Read a resource
    ///
    /// # Errors
    /// Returns error if the request fails
    fn read_resource(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Vec<ResourceContents>>> + Send;

    /// Shut the session down
    ///
    /// # Errors
    /// Returns error if the transport does not close cleanly
    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Opens sessions from server configuration
pub trait Connector: Send + Sync + 'static {
    /// Session type produced by this connector
    type Session: ToolSession;

    /// Connect and complete the `initialize` handshake
    ///
    /// # Errors
    /// Returns error if the server cannot be started or reached
    fn connect(
        &self,
        name: &str,
        config: &McpServerConfig,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}

// ============================================================================
// JSON-RPC backed session
// ============================================================================

/// MCP session over JSON-RPC
#[derive(Debug)]
pub struct RpcSession {
    name: String,
    client: RpcClient,
    initialize: InitializeResult,
}

impl RpcSession {
    /// Start `transport`, send `initialize` and `notifications/initialized`
    ///
    /// # Errors
    /// Returns error if the transport fails or the handshake is rejected
    pub async fn connect<T>(name: &str, transport: T, cancel: &CancellationToken) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let client = RpcClient::start(name, transport).await?;

        let handshake = async {
            let value = client
                .request("initialize", Some(initialize_params()), cancel, None)
                .await?;
            let initialize: InitializeResult = serde_json::from_value(value)?;
            client.notify("notifications/initialized", None)?;
            Ok::<_, CoreError>(initialize)
        };

        match handshake.await {
            Ok(initialize) => {
                log::info!(
                    "[{name}] Initialized (protocol {}, capabilities {:?})",
                    initialize.protocol_version,
                    initialize.capabilities
                );
                Ok(Self {
                    name: name.to_string(),
                    client,
                    initialize,
                })
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    log::debug!("[{name}] Close after failed handshake: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Server name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The server's `initialize` result
    #[must_use]
    pub fn initialize_result(&self) -> &InitializeResult {
        &self.initialize
    }

    async fn list_page(
        &self,
        method: &str,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let params = cursor.map(|c| json!({ "cursor": c }));
        self.client.request(method, params, cancel, None).await
    }
}

impl ToolSession for RpcSession {
    fn capabilities(&self) -> ServerCapabilities {
        self.initialize.capabilities
    }

    async fn ping(&self, cancel: &CancellationToken) -> Result<()> {
        self.client.request("ping", None, cancel, None).await?;
        Ok(())
    }

    async fn list_tools(&self, cancel: &CancellationToken) -> Result<Vec<Tool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let value = self.list_page("tools/list", cursor.as_deref(), cancel).await?;
            let page: ListToolsResult = serde_json::from_value(value)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_ref() != Some(&next) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn list_resources(&self, cancel: &CancellationToken) -> Result<Vec<Resource>> {
        let mut resources = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let value = self
                .list_page("resources/list", cursor.as_deref(), cancel)
                .await?;
            let page: ListResourcesResult = serde_json::from_value(value)?;
            resources.extend(page.resources);
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_ref() != Some(&next) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }
        Ok(resources)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> Result<CallToolResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let value = self
            .client
            .request("tools/call", Some(params), cancel, None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn read_resource(
        &self,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceContents>> {
        let value = self
            .client
            .request("resources/read", Some(json!({ "uri": uri })), cancel, None)
            .await?;
        let result: ReadResourceResult = serde_json::from_value(value)?;
        Ok(result.contents)
    }

    async fn close(&self) -> Result<()> {
        self.client.close().await
    }
}

/// Connector for stdio and (with the `http` feature) HTTP servers
#[derive(Debug, Clone, Default)]
pub struct RpcConnector {
    cwd: Option<PathBuf>,
}

impl RpcConnector {
    /// Connector that starts stdio servers in the current directory
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start stdio servers in `cwd`
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

impl Connector for RpcConnector {
    type Session = RpcSession;

    async fn connect(&self, name: &str, config: &McpServerConfig) -> Result<RpcSession> {
        let cancel = CancellationToken::new();
        match &config.transport {
            McpTransportConfig::Stdio(stdio) => {
                let mut transport = StdioTransport::new(name, stdio.clone())?;
                if let Some(cwd) = &self.cwd {
                    transport = transport.with_cwd(cwd);
                }
                RpcSession::connect(name, transport, &cancel).await
            }
            #[cfg(feature = "http")]
            McpTransportConfig::Http(http) => {
                let transport = crate::transport::HttpTransport::new(name, http.clone());
                RpcSession::connect(name, transport, &cancel).await
            }
            #[cfg(not(feature = "http"))]
            McpTransportConfig::Http(http) => Err(CoreError::invalid_config(format!(
                "[{name}] {} needs the `http` feature",
                http.url
            ))),
        }
    }
}
