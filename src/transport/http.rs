//! Streamable HTTP transport for remote MCP servers
//!
//! Every outgoing message is POSTed to the server URL. Replies arrive either
//! as a JSON body or as a short `text/event-stream` body whose `data:` lines
//! each carry one message.

use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{CoreError, Result};
use crate::transport::Transport;
use crate::types::mcp::McpHttpServerConfig;

/// Header carrying the server-assigned session
const SESSION_HEADER: &str = "mcp-session-id";

/// JSON-RPC code used for transport failures reported back to the caller
const TRANSPORT_ERROR_CODE: i64 = -32000;

type MessageSender = mpsc::UnboundedSender<Result<Value>>;

/// HTTP transport for one MCP server
pub struct HttpTransport {
    name: String,
    config: McpHttpServerConfig,
    client: Option<reqwest::Client>,
    session_id: Arc<Mutex<Option<String>>>,
    tx: Option<MessageSender>,
    rx: Option<mpsc::UnboundedReceiver<Result<Value>>>,
}

impl HttpTransport {
    /// Create a transport for the server `name`
    pub fn new(name: impl Into<String>, config: McpHttpServerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: None,
            session_id: Arc::new(Mutex::new(None)),
            tx: None,
            rx: None,
        }
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/event-stream"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in &self.config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| CoreError::invalid_config(format!("invalid header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CoreError::invalid_config(format!("invalid header value for {key}: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

async fn post(
    client: reqwest::Client,
    url: String,
    session_id: Arc<Mutex<Option<String>>>,
    body: String,
) -> Result<Vec<Value>> {
    let mut request = client.post(&url).body(body);
    if let Some(id) = session_id.lock().clone() {
        request = request.header(SESSION_HEADER, id);
    }

    let response = request
        .send()
        .await
        .map_err(|e| CoreError::transport(format!("POST {url} failed: {e}")))?;

    if let Some(id) = response
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        *session_id.lock() = Some(id.to_string());
    }

    let status = response.status();
    if status == reqwest::StatusCode::ACCEPTED {
        return Ok(Vec::new());
    }
    if !status.is_success() {
        return Err(CoreError::transport(format!("POST {url} returned {status}")));
    }

    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    let text = response
        .text()
        .await
        .map_err(|e| CoreError::transport(format!("Failed to read response body: {e}")))?;

    if is_sse {
        return Ok(parse_event_stream(&text));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<Value>(&text)? {
        Value::Array(batch) => Ok(batch),
        single => Ok(vec![single]),
    }
}

/// Extract JSON payloads from `data:` lines of an SSE body
fn parse_event_stream(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(chunk) = line.strip_prefix("data:") {
            data.push_str(chunk.trim_start());
        } else if line.is_empty() && !data.is_empty() {
            match serde_json::from_str(&data) {
                Ok(value) => messages.push(value),
                Err(e) => log::warn!("Skipping malformed event payload: {e}"),
            }
            data.clear();
        }
    }
    messages
}

impl Transport for HttpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let client = reqwest::Client::builder()
            .default_headers(self.default_headers()?)
            .build()
            .map_err(|e| CoreError::connection(format!("Failed to build HTTP client: {e}")))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.client = Some(client);
        self.tx = Some(tx);
        self.rx = Some(rx);
        log::debug!("[{}] HTTP transport ready for {}", self.name, self.config.url);
        Ok(())
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        let (Some(client), Some(tx)) = (self.client.clone(), self.tx.clone()) else {
            return Err(CoreError::transport("Transport is not ready for writing"));
        };

        // Requests run concurrently; a failed POST becomes an error response
        // so the waiting caller is released.
        let request_id = serde_json::from_str::<Value>(data)
            .ok()
            .and_then(|v| v.get("id").cloned());
        let url = self.config.url.clone();
        let session_id = Arc::clone(&self.session_id);
        let body = data.to_string();
        let name = self.name.clone();

        tokio::spawn(async move {
            match post(client, url, session_id, body).await {
                Ok(messages) => {
                    for message in messages {
                        let _ = tx.send(Ok(message));
                    }
                }
                Err(e) => {
                    log::warn!("[{name}] {e}");
                    let reply = match request_id {
                        Some(id) => Ok(json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "error": {"code": TRANSPORT_ERROR_CODE, "message": e.to_string()},
                        })),
                        None => Err(e),
                    };
                    let _ = tx.send(reply);
                }
            }
        });
        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<Value>> {
        self.rx.take().unwrap_or_else(|| mpsc::unbounded_channel().1)
    }

    fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        let session_id = self.session_id.lock().take();
        if let Some(id) = session_id {
            let _ = client
                .delete(&self.config.url)
                .header(SESSION_HEADER, id)
                .send()
                .await;
        }
        Ok(())
    }
}
