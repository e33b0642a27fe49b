//! Integration tests for `McpRegistry` against an in-memory server

use kodegen_agent_core::mcp::{
    CallToolResult, ConnectionState, Connector, McpEventKind, McpRegistry, Resource,
    ResourceContents, Tool, ToolResult, ToolSession,
};
use kodegen_agent_core::rpc::ServerCapabilities;
use kodegen_agent_core::types::{McpServerConfig, McpServers};
use kodegen_agent_core::{CoreError, Result};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const METHOD_NOT_FOUND: i64 = -32601;

// ============================================================================
// Fake server
// ============================================================================

#[derive(Clone)]
struct FakeServer {
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    capabilities: ServerCapabilities,
    resources_method_missing: bool,
    refuse_connect: bool,
    stall_connect: bool,
}

impl FakeServer {
    fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|n| tool(n)).collect(),
            resources: Vec::new(),
            capabilities: ServerCapabilities::TOOLS,
            resources_method_missing: false,
            refuse_connect: false,
            stall_connect: false,
        }
    }
}

fn tool(name: &str) -> Tool {
    serde_json::from_value(json!({"name": name, "description": format!("{name} tool")})).unwrap()
}

fn resource(uri: &str) -> Resource {
    serde_json::from_value(json!({"uri": uri, "name": uri})).unwrap()
}

struct FakeSession {
    server: FakeServer,
    alive: Arc<AtomicBool>,
    fail_listing: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    release: Arc<Notify>,
}

impl FakeSession {
    fn check(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoreError::connection("fake server went away"))
        }
    }
}

impl ToolSession for FakeSession {
    fn capabilities(&self) -> ServerCapabilities {
        self.server.capabilities
    }

    async fn ping(&self, _cancel: &CancellationToken) -> Result<()> {
        self.check()
    }

    async fn list_tools(&self, _cancel: &CancellationToken) -> Result<Vec<Tool>> {
        self.check()?;
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(CoreError::transport("listing broke"));
        }
        Ok(self.server.tools.clone())
    }

    async fn list_resources(&self, _cancel: &CancellationToken) -> Result<Vec<Resource>> {
        self.check()?;
        if self.server.resources_method_missing {
            return Err(CoreError::rpc(METHOD_NOT_FOUND, "Method not found", None));
        }
        Ok(self.server.resources.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        _cancel: &CancellationToken,
    ) -> Result<CallToolResult> {
        self.check()?;
        self.calls.lock().push((name.to_string(), arguments.clone()));
        match name {
            "die" => {
                self.alive.store(false, Ordering::SeqCst);
                return Err(CoreError::connection("broken pipe"));
            }
            "slow_die" => {
                self.release.notified().await;
                return Err(CoreError::connection("broken pipe"));
            }
            _ => {}
        }
        let content = match name {
            "screenshot" => json!([
                {"type": "text", "text": "captured"},
                {"type": "image", "data": "\u{0089}PNG raw", "mimeType": "image/png"}
            ]),
            _ => json!([{"type": "text", "text": format!("{name}: {arguments}")}]),
        };
        Ok(serde_json::from_value(json!({ "content": content }))?)
    }

    async fn read_resource(
        &self,
        uri: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ResourceContents>> {
        self.check()?;
        Ok(vec![serde_json::from_value(json!({"uri": uri, "text": "contents"}))?])
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Handles onto the most recent session opened for each server
#[derive(Clone, Default)]
struct Handles {
    alive: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
    closed: Arc<Mutex<HashMap<String, Vec<Arc<AtomicBool>>>>>,
    fail_listing: Arc<AtomicBool>,
    connects: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, Value)>>>,
    release: Arc<Notify>,
}

impl Handles {
    fn kill_session(&self, name: &str) {
        if let Some(alive) = self.alive.lock().get(name) {
            alive.store(false, Ordering::SeqCst);
        }
    }

    fn closed_sessions(&self, name: &str) -> usize {
        self.closed
            .lock()
            .get(name)
            .map_or(0, |v| v.iter().filter(|c| c.load(Ordering::SeqCst)).count())
    }
}

struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    handles: Handles,
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self, name: &str, _config: &McpServerConfig) -> Result<FakeSession> {
        self.handles.connects.fetch_add(1, Ordering::SeqCst);
        let server = self
            .servers
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::connection(format!("no fake server {name}")))?;
        if server.refuse_connect {
            return Err(CoreError::connection("connection refused"));
        }
        if server.stall_connect {
            std::future::pending::<()>().await;
        }

        let alive = Arc::new(AtomicBool::new(true));
        let closed = Arc::new(AtomicBool::new(false));
        self.handles
            .alive
            .lock()
            .insert(name.to_string(), Arc::clone(&alive));
        self.handles
            .closed
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Arc::clone(&closed));

        Ok(FakeSession {
            server,
            alive,
            fail_listing: Arc::clone(&self.handles.fail_listing),
            closed,
            calls: Arc::clone(&self.handles.calls),
            release: Arc::clone(&self.handles.release),
        })
    }
}

fn registry(servers: Vec<(&str, FakeServer, McpServerConfig)>) -> (McpRegistry<FakeConnector>, Handles) {
    let _ = env_logger::builder().is_test(true).try_init();
    let handles = Handles::default();
    let mut configs = McpServers::new();
    let mut fakes = HashMap::new();
    for (name, fake, config) in servers {
        configs.insert(name.to_string(), config);
        fakes.insert(name.to_string(), fake);
    }
    let connector = FakeConnector {
        servers: fakes,
        handles: handles.clone(),
    };
    (McpRegistry::new(connector, configs), handles)
}

fn config() -> McpServerConfig {
    McpServerConfig::stdio("fake-server", Vec::new())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_initialize_connects_and_caches_inventory() {
    let mut fake = FakeServer::with_tools(&["read", "write"]);
    fake.capabilities |= ServerCapabilities::RESOURCES;
    fake.resources = vec![resource("file:///a")];
    let (registry, _handles) = registry(vec![("fs", fake, config())]);
    let mut events = registry.events().subscribe();

    registry.initialize(&CancellationToken::new()).await;

    let info = registry.state("fs").unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.counts.tools, 2);
    assert_eq!(info.counts.resources, 1);
    assert!(info.connected_at.is_some());
    assert_eq!(registry.list_resources("fs").unwrap(), vec![resource("file:///a")]);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.payload.state)
        .collect();
    assert_eq!(
        states,
        vec![ConnectionState::Starting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn test_method_not_found_means_no_resources() {
    let mut fake = FakeServer::with_tools(&["read"]);
    fake.capabilities |= ServerCapabilities::RESOURCES;
    fake.resources_method_missing = true;
    let (registry, _handles) = registry(vec![("fs", fake, config())]);

    registry.initialize(&CancellationToken::new()).await;

    let info = registry.state("fs").unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.counts.resources, 0);
    assert_eq!(info.last_error, None);
}

#[tokio::test]
async fn test_missing_resources_capability_skips_listing() {
    let mut fake = FakeServer::with_tools(&["read"]);
    fake.resources = vec![resource("file:///hidden")];
    let (registry, _handles) = registry(vec![("fs", fake, config())]);

    registry.initialize(&CancellationToken::new()).await;

    assert!(registry.list_resources("fs").unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_server_is_not_started() {
    let mut disabled = config();
    disabled.disabled = true;
    let (registry, handles) = registry(vec![("off", FakeServer::with_tools(&["x"]), disabled)]);

    registry.initialize(&CancellationToken::new()).await;

    assert_eq!(registry.state("off").unwrap().state, ConnectionState::Disabled);
    assert_eq!(handles.connects.load(Ordering::SeqCst), 0);
    let result = registry
        .run_tool("off", "x", "{}", &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(CoreError::ServerDisabled(_))));
}

#[tokio::test]
async fn test_connect_failure_records_error() {
    let mut fake = FakeServer::with_tools(&["x"]);
    fake.refuse_connect = true;
    let good = FakeServer::with_tools(&["y"]);
    let (registry, _handles) = registry(vec![("bad", fake, config()), ("good", good, config())]);

    registry.initialize(&CancellationToken::new()).await;

    let bad = registry.state("bad").unwrap();
    assert_eq!(bad.state, ConnectionState::Error);
    assert!(bad.last_error.unwrap().contains("connection refused"));
    assert_eq!(
        registry.state("good").unwrap().state,
        ConnectionState::Connected
    );
}

#[tokio::test]
async fn test_run_tool_text_and_image() {
    let (registry, handles) = registry(vec![(
        "browser",
        FakeServer::with_tools(&["echo", "screenshot"]),
        config(),
    )]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    let result = registry
        .run_tool("browser", "echo", r#"{"msg": "hi"}"#, &cancel)
        .await
        .unwrap();
    assert_eq!(result.content(), r#"echo: {"msg":"hi"}"#);
    assert_eq!(
        handles.calls.lock().first().cloned(),
        Some(("echo".to_string(), json!({"msg": "hi"})))
    );

    let result = registry
        .run_tool("browser", "screenshot", "", &cancel)
        .await
        .unwrap();
    match result {
        ToolResult::Image {
            content,
            data,
            media_type,
        } => {
            assert_eq!(content, "captured");
            assert_eq!(media_type, "image/png");
            assert!(kodegen_agent_core::mcp::is_valid_base64(data.as_bytes()));
        }
        other => panic!("expected image, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_tool_rejects_bad_input() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["t"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    let result = registry.run_tool("s", "t", "{oops", &cancel).await;
    assert!(matches!(result, Err(CoreError::InvalidArguments(_))));
    assert!(handles.calls.lock().is_empty());

    let result = registry.run_tool("nope", "t", "{}", &cancel).await;
    assert!(matches!(result, Err(CoreError::ServerNotFound(_))));
}

#[tokio::test]
async fn test_stale_session_is_renewed_on_use() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["t"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;
    let mut events = registry.events().subscribe();

    handles.kill_session("s");
    let result = registry.run_tool("s", "t", "{}", &cancel).await.unwrap();
    assert_eq!(result.content(), "t: {}");

    assert_eq!(handles.connects.load(Ordering::SeqCst), 2);
    assert_eq!(handles.closed_sessions("s"), 1);
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Connected);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.payload.state)
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Error,
            ConnectionState::Starting,
            ConnectionState::Connected
        ]
    );
}

#[tokio::test]
async fn test_refresh_failure_keeps_cache() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["a", "b"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    handles.fail_listing.store(true, Ordering::SeqCst);
    let result = registry.refresh_tools("s", &cancel).await;
    assert!(result.is_err());

    let info = registry.state("s").unwrap();
    assert_eq!(info.state, ConnectionState::Error);
    assert_eq!(info.tools.len(), 2);
    assert_eq!(handles.closed_sessions("s"), 1);

    handles.fail_listing.store(false, Ordering::SeqCst);
    registry.run_tool("s", "a", "{}", &cancel).await.unwrap();
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Connected);
}

#[tokio::test]
async fn test_refresh_after_failure_reconnects() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["a"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    handles.fail_listing.store(true, Ordering::SeqCst);
    assert!(registry.refresh_tools("s", &cancel).await.is_err());
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Error);

    handles.fail_listing.store(false, Ordering::SeqCst);
    registry.refresh("s", &cancel).await.unwrap();

    let info = registry.state("s").unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.last_error, None);
    assert_eq!(handles.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_call_connection_failure_is_recorded() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["t", "die"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    let result = registry.run_tool("s", "die", "{}", &cancel).await;
    assert!(matches!(result, Err(CoreError::Connection(_))));

    let info = registry.state("s").unwrap();
    assert_eq!(info.state, ConnectionState::Error);
    assert!(info.last_error.unwrap().contains("broken pipe"));
    assert_eq!(handles.closed_sessions("s"), 1);

    registry.run_tool("s", "t", "{}", &cancel).await.unwrap();
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Connected);
    assert_eq!(handles.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_on_replaced_session_keeps_replacement() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["slow_die"]), config())]);
    let registry = Arc::new(registry);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    let call = {
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move { registry.run_tool("s", "slow_die", "{}", &cancel).await })
    };
    while handles.calls.lock().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The first session goes stale and is replaced while the call is in flight
    handles.kill_session("s");
    registry.get_or_renew("s", &cancel).await.unwrap();
    assert_eq!(handles.connects.load(Ordering::SeqCst), 2);

    handles.release.notify_one();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(CoreError::Connection(_))));

    let info = registry.state("s").unwrap();
    assert_eq!(info.state, ConnectionState::Connected);
    assert_eq!(info.last_error, None);
    assert_eq!(handles.closed_sessions("s"), 1);
}

#[tokio::test]
async fn test_refresh_publishes_tools_changed() {
    let (registry, _handles) = registry(vec![("s", FakeServer::with_tools(&["a"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;
    let mut events = registry.events().subscribe();

    registry.refresh("s", &cancel).await.unwrap();

    let kinds: Vec<McpEventKind> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.payload.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![McpEventKind::ToolsListChanged, McpEventKind::ResourcesListChanged]
    );
}

#[tokio::test]
async fn test_disabled_tools_and_qualified_names() {
    let (registry, _handles) = registry(vec![
        ("git", FakeServer::with_tools(&["status", "push"]), config()),
        ("fs", FakeServer::with_tools(&["read"]), config()),
    ]);
    registry.initialize(&CancellationToken::new()).await;

    registry
        .set_disabled_tools("git", vec!["push".to_string()])
        .unwrap();

    let names: Vec<String> = registry
        .all_tools()
        .into_iter()
        .map(|t| t.qualified_name)
        .collect();
    assert_eq!(names, vec!["mcp_fs_read", "mcp_git_status"]);
    assert_eq!(registry.state("git").unwrap().counts.tools, 1);
}

#[tokio::test]
async fn test_disable_and_enable() {
    let (registry, handles) = registry(vec![("s", FakeServer::with_tools(&["t"]), config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    registry.disable("s").await.unwrap();
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Disabled);
    assert_eq!(handles.closed_sessions("s"), 1);
    assert!(registry.all_tools().is_empty());

    registry.enable("s", &cancel).await.unwrap();
    assert_eq!(registry.state("s").unwrap().state, ConnectionState::Connected);
    assert_eq!(handles.connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_read_resource() {
    let mut fake = FakeServer::with_tools(&[]);
    fake.capabilities |= ServerCapabilities::RESOURCES;
    let (registry, _handles) = registry(vec![("docs", fake, config())]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    let contents = registry
        .read_resource("docs", "file:///readme", &cancel)
        .await
        .unwrap();
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].text.as_deref(), Some("contents"));
}

#[tokio::test]
async fn test_close_all() {
    let (registry, handles) = registry(vec![
        ("a", FakeServer::with_tools(&["t"]), config()),
        ("b", FakeServer::with_tools(&["t"]), config()),
    ]);
    let cancel = CancellationToken::new();
    registry.initialize(&cancel).await;

    registry.close_all().await;
    assert_eq!(handles.closed_sessions("a"), 1);
    assert_eq!(handles.closed_sessions("b"), 1);

    let result = registry.run_tool("a", "t", "{}", &cancel).await;
    assert!(matches!(result, Err(CoreError::Cancelled(_))));
}

#[tokio::test]
async fn test_cancelled_caller() {
    let (registry, _handles) = registry(vec![("s", FakeServer::with_tools(&["t"]), config())]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = registry.get_or_renew("s", &cancel).await;
    assert!(matches!(result, Err(CoreError::Cancelled(_))));
}

#[tokio::test]
async fn test_cancelled_connect_is_not_an_error() {
    let mut fake = FakeServer::with_tools(&["t"]);
    fake.stall_connect = true;
    let (registry, handles) = registry(vec![("s", fake, config())]);
    let mut events = registry.events().subscribe();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    registry.initialize(&cancel).await;

    let info = registry.state("s").unwrap();
    assert_eq!(info.state, ConnectionState::Disabled);
    assert_eq!(info.last_error, None);
    assert_eq!(handles.connects.load(Ordering::SeqCst), 1);

    let states: Vec<ConnectionState> = std::iter::from_fn(|| events.try_recv())
        .map(|e| e.payload.state)
        .collect();
    assert_eq!(
        states,
        vec![ConnectionState::Starting, ConnectionState::Disabled]
    );
}
