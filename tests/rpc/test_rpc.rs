//! Integration tests for `RpcClient` and `RpcSession` over an in-memory transport

use kodegen_agent_core::mcp::{RpcSession, ToolSession};
use kodegen_agent_core::rpc::ServerCapabilities;
use kodegen_agent_core::transport::Transport;
use kodegen_agent_core::{CoreError, Result, RpcClient};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STEP: Duration = Duration::from_secs(5);

// ============================================================================
// In-memory transport
// ============================================================================

struct ChannelTransport {
    to_server: mpsc::UnboundedSender<Value>,
    from_server: Option<mpsc::UnboundedReceiver<Result<Value>>>,
    ready: bool,
    closed: Arc<AtomicBool>,
}

/// The server's end of a [`ChannelTransport`]
struct FakeServer {
    inbox: mpsc::UnboundedReceiver<Value>,
    outbox: mpsc::UnboundedSender<Result<Value>>,
    closed: Arc<AtomicBool>,
}

fn channel_pair() -> (ChannelTransport, FakeServer) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (to_server, inbox) = mpsc::unbounded_channel();
    let (outbox, from_server) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        ChannelTransport {
            to_server,
            from_server: Some(from_server),
            ready: false,
            closed: Arc::clone(&closed),
        },
        FakeServer {
            inbox,
            outbox,
            closed,
        },
    )
}

impl Transport for ChannelTransport {
    async fn connect(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        let value: Value = serde_json::from_str(data)?;
        self.to_server
            .send(value)
            .map_err(|_| CoreError::transport("server gone"))
    }

    async fn end_input(&mut self) -> Result<()> {
        self.ready = false;
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<Value>> {
        self.from_server.take().unwrap_or_else(|| {
            let (_tx, rx) = mpsc::unbounded_channel();
            rx
        })
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl FakeServer {
    async fn next(&mut self) -> Value {
        tokio::time::timeout(STEP, self.inbox.recv())
            .await
            .expect("client sent nothing")
            .expect("client hung up")
    }

    fn send(&self, value: Value) {
        self.outbox.send(Ok(value)).unwrap();
    }

    fn reply(&self, request: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": request["id"], "result": result}));
    }

    /// Answer `initialize` and swallow `notifications/initialized`
    async fn handshake(&mut self, capabilities: Value) {
        let init = self.next().await;
        assert_eq!(init["method"], "initialize");
        assert!(init["params"]["protocolVersion"].is_string());
        self.reply(
            &init,
            json!({
                "protocolVersion": "2025-06-18",
                "capabilities": capabilities,
                "serverInfo": {"name": "fake", "version": "0.0.1"}
            }),
        );
        let initialized = self.next().await;
        assert_eq!(initialized["method"], "notifications/initialized");
        assert!(initialized.get("id").is_none());
    }
}

async fn client() -> (Arc<RpcClient>, FakeServer) {
    let (transport, server) = channel_pair();
    let client = RpcClient::start("fake", transport).await.unwrap();
    (Arc::new(client), server)
}

fn spawn_request(
    client: &Arc<RpcClient>,
    method: &'static str,
    params: Option<Value>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> tokio::task::JoinHandle<Result<Value>> {
    let client = Arc::clone(client);
    tokio::spawn(async move { client.request(method, params, &cancel, timeout).await })
}

// ============================================================================
// RpcClient
// ============================================================================

#[tokio::test]
async fn test_request_response() {
    let (client, mut server) = client().await;
    let call = spawn_request(
        &client,
        "tools/list",
        Some(json!({"cursor": "abc"})),
        CancellationToken::new(),
        None,
    );

    let request = server.next().await;
    assert_eq!(request["jsonrpc"], "2.0");
    assert_eq!(request["method"], "tools/list");
    assert_eq!(request["params"], json!({"cursor": "abc"}));
    assert!(request["id"].is_u64());

    server.reply(&request, json!({"tools": []}));
    assert_eq!(call.await.unwrap().unwrap(), json!({"tools": []}));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_responses_match_out_of_order() {
    let (client, mut server) = client().await;
    let first = spawn_request(&client, "first", None, CancellationToken::new(), None);
    let a = server.next().await;
    let second = spawn_request(&client, "second", None, CancellationToken::new(), None);
    let b = server.next().await;
    assert_ne!(a["id"], b["id"]);

    server.reply(&b, json!("b"));
    server.reply(&a, json!("a"));

    assert_eq!(first.await.unwrap().unwrap(), json!("a"));
    assert_eq!(second.await.unwrap().unwrap(), json!("b"));
}

#[tokio::test]
async fn test_error_response() {
    let (client, mut server) = client().await;
    let call = spawn_request(&client, "tools/call", None, CancellationToken::new(), None);

    let request = server.next().await;
    server.send(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": {"code": -32602, "message": "bad params", "data": {"field": "name"}}
    }));

    match call.await.unwrap() {
        Err(CoreError::Rpc {
            code,
            message,
            data,
        }) => {
            assert_eq!(code, -32602);
            assert_eq!(message, "bad params");
            assert_eq!(data, Some(json!({"field": "name"})));
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_sends_cancellation() {
    let (client, mut server) = client().await;
    let call = spawn_request(
        &client,
        "slow",
        None,
        CancellationToken::new(),
        Some(Duration::from_millis(50)),
    );

    let request = server.next().await;
    let result = call.await.unwrap();
    assert!(matches!(result, Err(CoreError::Timeout(_))));

    let cancelled = server.next().await;
    assert_eq!(cancelled["method"], "notifications/cancelled");
    assert_eq!(cancelled["params"]["requestId"], request["id"]);
    assert_eq!(client.pending_count(), 0);

    // A late answer is ignored
    server.reply(&request, json!({}));
}

#[tokio::test]
async fn test_cancel_sends_cancellation() {
    let (client, mut server) = client().await;
    let cancel = CancellationToken::new();
    let call = spawn_request(&client, "slow", None, cancel.clone(), None);

    let request = server.next().await;
    cancel.cancel();
    let result = call.await.unwrap();
    assert!(matches!(result, Err(CoreError::Cancelled(_))));

    let cancelled = server.next().await;
    assert_eq!(cancelled["method"], "notifications/cancelled");
    assert_eq!(cancelled["params"]["requestId"], request["id"]);
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (_client, mut server) = client().await;

    server.send(json!({"jsonrpc": "2.0", "id": "srv-1", "method": "ping"}));

    let reply = server.next().await;
    assert_eq!(reply["id"], "srv-1");
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn test_unknown_server_request_is_rejected() {
    let (_client, mut server) = client().await;

    server.send(json!({"jsonrpc": "2.0", "id": 9, "method": "sampling/createMessage"}));

    let reply = server.next().await;
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32601);
}

#[tokio::test]
async fn test_notifications_are_sent_without_id() {
    let (client, mut server) = client().await;

    client
        .notify("notifications/progress", Some(json!({"progress": 1})))
        .unwrap();

    let notification = server.next().await;
    assert_eq!(notification["method"], "notifications/progress");
    assert!(notification.get("id").is_none());
}

#[tokio::test]
async fn test_server_exit_fails_pending_requests() {
    let (client, mut server) = client().await;
    let call = spawn_request(&client, "slow", None, CancellationToken::new(), None);
    server.next().await;

    drop(server);

    let result = tokio::time::timeout(STEP, call).await.unwrap().unwrap();
    assert!(matches!(result, Err(CoreError::Connection(_))));
    assert!(!client.is_connected());

    let result = client
        .request("again", None, &CancellationToken::new(), None)
        .await;
    assert!(matches!(result, Err(CoreError::Connection(_))));
}

#[tokio::test]
async fn test_close_fails_pending_and_closes_transport() {
    let (client, mut server) = client().await;
    let call = spawn_request(&client, "slow", None, CancellationToken::new(), None);
    server.next().await;

    client.close().await.unwrap();

    assert!(server.closed.load(Ordering::SeqCst));
    assert!(!client.is_connected());
    let result = call.await.unwrap();
    assert!(matches!(result, Err(CoreError::Connection(_))));
}

// ============================================================================
// RpcSession
// ============================================================================

#[tokio::test]
async fn test_session_handshake_and_paginated_listing() {
    let (transport, mut server) = channel_pair();
    let cancel = CancellationToken::new();

    let server_task = tokio::spawn(async move {
        server
            .handshake(json!({"tools": {"listChanged": true}, "resources": {}}))
            .await;

        let page1 = server.next().await;
        assert_eq!(page1["method"], "tools/list");
        assert!(page1.get("params").is_none_or(Value::is_null));
        server.reply(
            &page1,
            json!({"tools": [{"name": "read"}], "nextCursor": "p2"}),
        );

        let page2 = server.next().await;
        assert_eq!(page2["params"]["cursor"], "p2");
        server.reply(&page2, json!({"tools": [{"name": "write"}]}));
        server
    });

    let session = RpcSession::connect("fake", transport, &cancel).await.unwrap();
    assert!(session.capabilities().contains(ServerCapabilities::TOOLS));
    assert!(session.capabilities().contains(ServerCapabilities::RESOURCES));
    assert_eq!(session.initialize_result().protocol_version, "2025-06-18");

    let tools = session.list_tools(&cancel).await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["read", "write"]);
    assert_eq!(tools[0].input_schema, json!({"type": "object"}));

    let _server = server_task.await.unwrap();
}

#[tokio::test]
async fn test_session_call_tool() {
    let (transport, mut server) = channel_pair();
    let cancel = CancellationToken::new();

    let server_task = tokio::spawn(async move {
        server.handshake(json!({"tools": {}})).await;
        let call = server.next().await;
        assert_eq!(call["method"], "tools/call");
        assert_eq!(call["params"]["name"], "echo");
        assert_eq!(call["params"]["arguments"], json!({"text": "hi"}));
        server.reply(
            &call,
            json!({"content": [{"type": "text", "text": "hi"}], "isError": false}),
        );
        server
    });

    let session = RpcSession::connect("fake", transport, &cancel).await.unwrap();
    let result = session
        .call_tool("echo", json!({"text": "hi"}), &cancel)
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content.len(), 1);

    let _server = server_task.await.unwrap();
}

#[tokio::test]
async fn test_rejected_handshake_closes_transport() {
    let (transport, mut server) = channel_pair();
    let closed = Arc::clone(&server.closed);

    let server_task = tokio::spawn(async move {
        let init = server.next().await;
        server.send(json!({
            "jsonrpc": "2.0",
            "id": init["id"],
            "error": {"code": -32600, "message": "unsupported protocol"}
        }));
        server
    });

    let result = RpcSession::connect("fake", transport, &CancellationToken::new()).await;
    assert!(matches!(result, Err(CoreError::Rpc { code: -32600, .. })));
    assert!(closed.load(Ordering::SeqCst));

    let _server = server_task.await.unwrap();
}
