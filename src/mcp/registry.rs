//! Registry of named MCP servers
//!
//! The registry owns one [`ToolSession`] per configured server, caches each
//! server's tool and resource inventory, and drives the
//! [`ConnectionState`] machine. Sessions are renewed lazily: every call
//! pings the cached session first and reconnects if the ping fails.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::pubsub::{Broker, EventType};
use crate::rpc::ServerCapabilities;
use crate::types::mcp::{McpServerConfig, McpServers};

use super::protocol::{Resource, ResourceContents, Tool};
use super::result::ToolResult;
use super::session::{Connector, ToolSession};
use super::state::{ConnectionInfo, ConnectionState, Counts, McpEvent, McpEventKind};

/// Prefix of agent-facing tool names
pub const TOOL_NAME_PREFIX: &str = "mcp";

/// A tool together with the server that provides it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifiedTool {
    /// `mcp_<server>_<tool>`
    pub qualified_name: String,
    /// Server name
    pub server: String,
    /// Tool definition
    pub tool: Tool,
}

/// Build the agent-facing name of a server tool
#[must_use]
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{TOOL_NAME_PREFIX}_{server}_{tool}")
}

struct ServerEntry<S> {
    config: McpServerConfig,
    state: ConnectionState,
    last_error: Option<String>,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    connected_at: Option<DateTime<Utc>>,
    session: Option<Arc<S>>,
}

impl<S> ServerEntry<S> {
    fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disabled,
            last_error: None,
            tools: Vec::new(),
            resources: Vec::new(),
            connected_at: None,
            session: None,
        }
    }

    fn visible_tools(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|t| !self.config.is_tool_disabled(&t.name))
            .cloned()
            .collect()
    }

    fn counts(&self) -> Counts {
        Counts {
            tools: self
                .tools
                .iter()
                .filter(|t| !self.config.is_tool_disabled(&t.name))
                .count(),
            resources: self.resources.len(),
        }
    }

    fn info(&self, name: &str) -> ConnectionInfo {
        ConnectionInfo {
            name: name.to_string(),
            state: self.state,
            tools: self.visible_tools(),
            resources: self.resources.clone(),
            last_error: self.last_error.clone(),
            counts: self.counts(),
            connected_at: self.connected_at,
        }
    }

    /// Move to `next` and build the event describing it
    fn apply(
        &mut self,
        name: &str,
        next: ConnectionState,
        error: Option<String>,
        kind: McpEventKind,
    ) -> Result<McpEvent> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                name: name.to_string(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        match next {
            ConnectionState::Error => self.last_error.clone_from(&error),
            ConnectionState::Connected => self.last_error = None,
            ConnectionState::Disabled => self.connected_at = None,
            ConnectionState::Starting => {}
        }
        Ok(McpEvent {
            name: name.to_string(),
            kind,
            state: next,
            error,
            counts: self.counts(),
        })
    }

    fn holds(&self, session: &Arc<S>) -> bool {
        self.session.as_ref().is_some_and(|s| Arc::ptr_eq(s, session))
    }
}

/// Registry of MCP servers keyed by configured name
pub struct McpRegistry<C: Connector> {
    connector: C,
    servers: RwLock<HashMap<String, ServerEntry<C::Session>>>,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    events: Broker<McpEvent>,
    shutdown: CancellationToken,
}

impl<C: Connector> std::fmt::Debug for McpRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let servers = self.servers.read();
        let states: HashMap<&str, ConnectionState> =
            servers.iter().map(|(k, v)| (k.as_str(), v.state)).collect();
        f.debug_struct("McpRegistry")
            .field("servers", &states)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> McpRegistry<C> {
    /// Create a registry; nothing connects until [`initialize`](Self::initialize)
    pub fn new(connector: C, servers: McpServers) -> Self {
        let servers = servers
            .into_iter()
            .map(|(name, config)| (name, ServerEntry::new(config)))
            .collect();
        Self {
            connector,
            servers: RwLock::new(servers),
            gates: Mutex::new(HashMap::new()),
            events: Broker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// State change and inventory events
    #[must_use]
    pub fn events(&self) -> Broker<McpEvent> {
        self.events.clone()
    }

    /// Configured server names, sorted
    #[must_use]
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Connect every enabled server concurrently
    ///
    /// Failures are recorded per server as [`ConnectionState::Error`] and
    /// published; they do not fail the whole call.
    pub async fn initialize(&self, cancel: &CancellationToken) {
        let names = self.server_names();
        let started = join_all(names.iter().map(|name| async move {
            if self.is_configured_disabled(name) {
                self.announce(name, McpEventKind::StateChanged);
                log::info!("[{name}] MCP server disabled by configuration");
                return;
            }
            if let Err(e) = self.connect_gated(name, cancel).await {
                log::warn!("[{name}] MCP server failed to start: {e}");
            }
        }))
        .await;
        log::debug!("Initialized {} MCP servers", started.len());
    }

    /// Visible tools of `name` from the cache
    ///
    /// # Errors
    /// Returns `CoreError::ServerNotFound` for unknown names
    pub fn list_tools(&self, name: &str) -> Result<Vec<Tool>> {
        self.with_entry(name, ServerEntry::visible_tools)
    }

    /// Resources of `name` from the cache
    ///
    /// # Errors
    /// Returns `CoreError::ServerNotFound` for unknown names
    pub fn list_resources(&self, name: &str) -> Result<Vec<Resource>> {
        self.with_entry(name, |entry| entry.resources.clone())
    }

    /// Replace the list of tools hidden from the agent
    ///
    /// # Errors
    /// Returns `CoreError::ServerNotFound` for unknown names
    pub fn set_disabled_tools(&self, name: &str, disabled_tools: Vec<String>) -> Result<()> {
        {
            let mut servers = self.servers.write();
            let entry = servers
                .get_mut(name)
                .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))?;
            entry.config.disabled_tools = disabled_tools;
        }
        self.announce(name, McpEventKind::ToolsListChanged);
        Ok(())
    }

    /// Every visible tool of every enabled server, by qualified name
    #[must_use]
    pub fn all_tools(&self) -> Vec<QualifiedTool> {
        let servers = self.servers.read();
        let mut tools: Vec<QualifiedTool> = servers
            .iter()
            .filter(|(_, entry)| entry.state != ConnectionState::Disabled)
            .flat_map(|(server, entry)| {
                entry.visible_tools().into_iter().map(move |tool| QualifiedTool {
                    qualified_name: qualified_tool_name(server, &tool.name),
                    server: server.clone(),
                    tool,
                })
            })
            .collect();
        tools.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        tools
    }

    /// Snapshot of every server
    #[must_use]
    pub fn states(&self) -> HashMap<String, ConnectionInfo> {
        self.servers
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info(name)))
            .collect()
    }

    /// Snapshot of one server
    #[must_use]
    pub fn state(&self, name: &str) -> Option<ConnectionInfo> {
        self.servers.read().get(name).map(|entry| entry.info(name))
    }

    /// Run `tool` on server `name` with JSON `input`
    ///
    /// Empty input is treated as `{}`.
    ///
    /// # Errors
    /// - `CoreError::InvalidArguments` if `input` is not a JSON object
    /// - connection errors from renewing the session
    /// - the server's error for the call itself; connection failures also move
    ///   the server to `Error` so the next call reconnects
    pub async fn run_tool(
        &self,
        name: &str,
        tool: &str,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<ToolResult> {
        let arguments = parse_arguments(input)?;
        let session = self.get_or_renew(name, cancel).await?;
        let result = self
            .until_shutdown(session.call_tool(tool, arguments, cancel))
            .await;
        let result = self.record_failure(name, &session, result).await?;
        if result.is_error {
            log::debug!("[{name}] Tool {tool} reported an error");
        }
        Ok(ToolResult::from(result))
    }

    /// Read resource `uri` from server `name`
    ///
    /// # Errors
    /// Returns connection errors or the server's error
    pub async fn read_resource(
        &self,
        name: &str,
        uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceContents>> {
        let session = self.get_or_renew(name, cancel).await?;
        let result = self.until_shutdown(session.read_resource(uri, cancel)).await;
        self.record_failure(name, &session, result).await
    }

    /// Reload both inventories of `name`
    ///
    /// # Errors
    /// Returns the first failure; the server is then in `Error`
    pub async fn refresh(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.refresh_tools(name, cancel).await?;
        self.refresh_resources(name, cancel).await
    }

    /// Reload the tool inventory of `name`
    ///
    /// Reconnects first if the session is gone or stale. On failure the
    /// cached tools stay available, the session is dropped and the server
    /// moves to `Error`.
    ///
    /// # Errors
    /// Returns connection errors or the listing failure
    pub async fn refresh_tools(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_gate(name, cancel).await?;
        let session = self.renew(name, cancel).await?;
        match self.until_shutdown(fetch_tools(name, session.as_ref(), cancel)).await {
            Ok(tools) => {
                self.with_entry_mut(name, |entry| entry.tools = tools)?;
                self.transition(name, ConnectionState::Connected, None, McpEventKind::ToolsListChanged)
            }
            Err(e) => {
                if !e.is_cancellation() {
                    self.fail_session(name, &session, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Reload the resource inventory of `name`
    ///
    /// # Errors
    /// Returns connection errors or the listing failure
    pub async fn refresh_resources(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_gate(name, cancel).await?;
        let session = self.renew(name, cancel).await?;
        match self
            .until_shutdown(fetch_resources(name, session.as_ref(), cancel))
            .await
        {
            Ok(resources) => {
                self.with_entry_mut(name, |entry| entry.resources = resources)?;
                self.transition(
                    name,
                    ConnectionState::Connected,
                    None,
                    McpEventKind::ResourcesListChanged,
                )
            }
            Err(e) => {
                if !e.is_cancellation() {
                    self.fail_session(name, &session, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Return a live session for `name`, reconnecting if needed
    ///
    /// # Errors
    /// - `CoreError::ServerNotFound` / `CoreError::ServerDisabled`
    /// - `CoreError::Cancelled` if `cancel` fires
    /// - connection errors if reconnecting fails
    pub async fn get_or_renew(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<C::Session>> {
        let _guard = self.lock_gate(name, cancel).await?;
        self.renew(name, cancel).await
    }

    /// Allow `name` to run and connect it
    ///
    /// # Errors
    /// Returns error if connecting fails
    pub async fn enable(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.with_entry_mut(name, |entry| entry.config.disabled = false)?;
        self.get_or_renew(name, cancel).await.map(|_| ())
    }

    /// Stop `name` and keep it stopped
    ///
    /// # Errors
    /// Returns `CoreError::ServerNotFound` for unknown names
    pub async fn disable(&self, name: &str) -> Result<()> {
        let (session, was_disabled) = self.with_entry_mut(name, |entry| {
            entry.config.disabled = true;
            (entry.session.take(), entry.state == ConnectionState::Disabled)
        })?;
        if !was_disabled {
            self.transition(name, ConnectionState::Disabled, None, McpEventKind::StateChanged)?;
        }
        if let Some(session) = session {
            close_session(name, session.as_ref()).await;
        }
        Ok(())
    }

    /// Cancel in-flight calls and close every session
    pub async fn close_all(&self) {
        self.shutdown.cancel();
        let sessions: Vec<(String, Arc<C::Session>)> = {
            let mut servers = self.servers.write();
            servers
                .iter_mut()
                .filter_map(|(name, entry)| entry.session.take().map(|s| (name.clone(), s)))
                .collect()
        };
        join_all(
            sessions
                .iter()
                .map(|(name, session)| close_session(name, session.as_ref())),
        )
        .await;
        log::info!("Closed {} MCP sessions", sessions.len());
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn gate(&self, name: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.gates.lock().entry(name.to_string()).or_default())
    }

    fn is_configured_disabled(&self, name: &str) -> bool {
        self.servers
            .read()
            .get(name)
            .is_some_and(|entry| entry.config.disabled)
    }

    fn with_entry<T>(&self, name: &str, f: impl FnOnce(&ServerEntry<C::Session>) -> T) -> Result<T> {
        self.servers
            .read()
            .get(name)
            .map(f)
            .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))
    }

    fn with_entry_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ServerEntry<C::Session>) -> T,
    ) -> Result<T> {
        self.servers
            .write()
            .get_mut(name)
            .map(f)
            .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))
    }

    async fn lock_gate(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>> {
        let gate = self.gate(name);
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Err(CoreError::cancelled(format!("waiting for mcp '{name}'")))
            }
            guard = gate.lock_owned() => Ok(guard),
        }
    }

    /// Ping the cached session and reconnect if it is gone or stale;
    /// caller holds the gate for `name`
    async fn renew(&self, name: &str, cancel: &CancellationToken) -> Result<Arc<C::Session>> {
        let (session, config) = self.with_entry(name, |entry| {
            (entry.session.clone(), entry.config.clone())
        })?;
        if config.disabled {
            return Err(CoreError::ServerDisabled(name.to_string()));
        }

        if let Some(session) = session {
            let limit = config.timeout();
            let ping = tokio::time::timeout(limit, session.ping(cancel)).await;
            let failure = match ping {
                Ok(Ok(())) => return Ok(session),
                Ok(Err(e)) if e.is_cancellation() => return Err(e),
                Ok(Err(e)) => e,
                Err(_) => CoreError::timeout(format!("ping timed out after {limit:?}")),
            };
            log::warn!("[{name}] Session is stale, reconnecting: {failure}");
            self.fail_session(name, &session, &failure).await;
        }

        self.connect(name, cancel).await
    }

    /// Drop `session` if a call on it hit a connection failure
    async fn record_failure<T>(
        &self,
        name: &str,
        session: &Arc<C::Session>,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_failure()
        {
            self.fail_session(name, session, e).await;
        }
        result
    }

    async fn until_shutdown<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                Err(CoreError::cancelled("mcp registry is shutting down"))
            }
            result = fut => result,
        }
    }

    async fn connect_gated(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock_gate(name, cancel).await?;
        self.connect(name, cancel).await.map(|_| ())
    }

    /// Starting -> Connected | Error; caller holds the gate for `name`
    async fn connect(&self, name: &str, cancel: &CancellationToken) -> Result<Arc<C::Session>> {
        let (config, state, mut prior_error) = self.with_entry(name, |entry| {
            (entry.config.clone(), entry.state, entry.last_error.clone())
        })?;
        if config.disabled {
            return Err(CoreError::ServerDisabled(name.to_string()));
        }
        if !state.can_transition_to(ConnectionState::Starting) {
            prior_error = Some("session lost".to_string());
            self.transition(
                name,
                ConnectionState::Error,
                prior_error.clone(),
                McpEventKind::StateChanged,
            )?;
        }
        self.transition(name, ConnectionState::Starting, None, McpEventKind::StateChanged)?;

        let limit = config.timeout();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CoreError::cancelled(format!("connecting to mcp '{name}'"))),
            () = self.shutdown.cancelled() => Err(CoreError::cancelled("mcp registry is shutting down")),
            result = tokio::time::timeout(limit, self.establish(name, &config, cancel)) => {
                result.unwrap_or_else(|_| {
                    Err(CoreError::timeout(format!("[{name}] connect timed out after {limit:?}")))
                })
            }
        };

        match outcome {
            Ok((session, tools, resources)) => {
                let session = Arc::new(session);
                self.with_entry_mut(name, |entry| {
                    entry.session = Some(Arc::clone(&session));
                    entry.tools = tools;
                    entry.resources = resources;
                    entry.connected_at = Some(Utc::now());
                })?;
                // A concurrent disable wins over this connect
                if let Err(e) = self.transition(
                    name,
                    ConnectionState::Connected,
                    None,
                    McpEventKind::StateChanged,
                ) {
                    let _ = self.with_entry_mut(name, |entry| entry.session = None);
                    close_session(name, session.as_ref()).await;
                    return Err(e);
                }
                Ok(session)
            }
            Err(e) => {
                // A cancelled connect is not a server failure: fall back to
                // where the server was before it started
                let (next, error) = match (e.is_cancellation(), state) {
                    (true, ConnectionState::Disabled) => (ConnectionState::Disabled, None),
                    (true, _) => (ConnectionState::Error, prior_error),
                    (false, _) => (ConnectionState::Error, Some(e.to_string())),
                };
                if let Err(transition_err) =
                    self.transition(name, next, error, McpEventKind::StateChanged)
                {
                    log::debug!("[{name}] {transition_err}");
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        name: &str,
        config: &McpServerConfig,
        cancel: &CancellationToken,
    ) -> Result<(C::Session, Vec<Tool>, Vec<Resource>)> {
        let session = self.connector.connect(name, config).await?;
        let inventory = async {
            let tools = fetch_tools(name, &session, cancel).await?;
            let resources = fetch_resources(name, &session, cancel).await?;
            Ok::<_, CoreError>((tools, resources))
        };
        match inventory.await {
            Ok((tools, resources)) => Ok((session, tools, resources)),
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    log::debug!("[{name}] Close after failed listing: {close_err}");
                }
                Err(e)
            }
        }
    }

    /// Record `error`, drop `used` and close it
    ///
    /// Does nothing if `used` is no longer the cached session, so a failure
    /// on an old session never tears down its replacement.
    async fn fail_session(&self, name: &str, used: &Arc<C::Session>, error: &CoreError) {
        let outcome = {
            let mut servers = self.servers.write();
            match servers.get_mut(name) {
                Some(entry) if entry.holds(used) => {
                    let session = entry.session.take();
                    let event = entry.apply(
                        name,
                        ConnectionState::Error,
                        Some(error.to_string()),
                        McpEventKind::StateChanged,
                    );
                    Some((session, event))
                }
                _ => None,
            }
        };

        let Some((session, event)) = outcome else {
            log::debug!("[{name}] Failed session was already replaced: {error}");
            return;
        };
        match event {
            Ok(event) => self.publish(name, event),
            Err(e) => log::debug!("[{name}] {e}"),
        }
        if let Some(session) = session {
            close_session(name, session.as_ref()).await;
        }
    }

    fn transition(
        &self,
        name: &str,
        next: ConnectionState,
        error: Option<String>,
        kind: McpEventKind,
    ) -> Result<()> {
        let event = {
            let mut servers = self.servers.write();
            servers
                .get_mut(name)
                .ok_or_else(|| CoreError::ServerNotFound(name.to_string()))?
                .apply(name, next, error, kind)?
        };
        self.publish(name, event);
        Ok(())
    }

    fn publish(&self, name: &str, event: McpEvent) {
        match &event.error {
            Some(error) => log::warn!("[{name}] MCP state -> {}: {error}", event.state),
            None => log::info!(
                "[{name}] MCP state -> {} ({} tools, {} resources)",
                event.state,
                event.counts.tools,
                event.counts.resources
            ),
        }
        self.events.publish(EventType::Updated, event);
    }

    /// Publish the current state without changing it
    fn announce(&self, name: &str, kind: McpEventKind) {
        let event = self.servers.read().get(name).map(|entry| McpEvent {
            name: name.to_string(),
            kind,
            state: entry.state,
            error: entry.last_error.clone(),
            counts: entry.counts(),
        });
        if let Some(event) = event {
            self.events.publish(EventType::Updated, event);
        }
    }
}

impl<C: Connector> Drop for McpRegistry<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn parse_arguments(input: &str) -> Result<Value> {
    if input.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    let value: Value =
        serde_json::from_str(input).map_err(|e| CoreError::InvalidArguments(e.to_string()))?;
    if !value.is_object() {
        return Err(CoreError::InvalidArguments(format!(
            "expected a JSON object, got {input}"
        )));
    }
    Ok(value)
}

async fn fetch_tools<S: ToolSession>(
    name: &str,
    session: &S,
    cancel: &CancellationToken,
) -> Result<Vec<Tool>> {
    match session.list_tools(cancel).await {
        Ok(tools) => Ok(tools),
        Err(e) if e.is_method_not_found() => {
            log::warn!("[{name}] Server does not support tools/list: {e}");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

async fn fetch_resources<S: ToolSession>(
    name: &str,
    session: &S,
    cancel: &CancellationToken,
) -> Result<Vec<Resource>> {
    if !session.capabilities().contains(ServerCapabilities::RESOURCES) {
        return Ok(Vec::new());
    }
    match session.list_resources(cancel).await {
        Ok(resources) => Ok(resources),
        Err(e) if e.is_method_not_found() => {
            log::warn!("[{name}] Server does not support resources/list: {e}");
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

async fn close_session<S: ToolSession>(name: &str, session: &S) {
    if let Err(e) = session.close().await {
        log::debug!("[{name}] Close failed: {e}");
    }
}
