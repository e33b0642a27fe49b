//! JSON-RPC client correlating requests and responses over a transport

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, METHOD_NOT_FOUND, Result};
use crate::transport::Transport;

use super::messages::{
    IncomingMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value>>>;

/// How long `close` waits for the writer to shut the transport down
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

enum Outgoing {
    Message(String),
    Close(oneshot::Sender<Result<()>>),
}

/// Request/response multiplexer for one server connection
///
/// A writer task owns the transport; a dispatcher task routes responses to
/// their waiting callers and answers server-initiated requests.
pub struct RpcClient {
    name: String,
    next_request_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    disconnected: CancellationToken,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("name", &self.name)
            .field("pending", &self.pending.lock().len())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connect `transport` and start the background tasks
    ///
    /// # Errors
    /// Returns error if the transport fails to connect
    pub async fn start<T>(name: impl Into<String>, mut transport: T) -> Result<Self>
    where
        T: Transport + 'static,
    {
        let name = name.into();
        transport.connect().await?;
        let incoming = transport.read_messages();

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let disconnected = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let writer_task = tokio::spawn(write_loop(
            name.clone(),
            transport,
            outgoing_rx,
            disconnected.clone(),
        ));
        let dispatch_task = tokio::spawn(dispatch_loop(
            name.clone(),
            incoming,
            Arc::clone(&pending),
            outgoing_tx.clone(),
            disconnected.clone(),
        ));

        Ok(Self {
            name,
            next_request_id: AtomicU64::new(1),
            pending,
            outgoing: outgoing_tx,
            disconnected,
            writer_task: Mutex::new(Some(writer_task)),
            dispatch_task: Mutex::new(Some(dispatch_task)),
        })
    }

    /// Whether the server side is still reachable
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.disconnected.is_cancelled()
    }

    /// Number of requests awaiting a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and wait for its result
    ///
    /// When `cancel` fires or `timeout` elapses the server is sent
    /// `notifications/cancelled` for the request.
    ///
    /// # Errors
    /// - `CoreError::Rpc` if the server answered with an error
    /// - `CoreError::Cancelled` / `CoreError::Timeout` for abandoned requests
    /// - `CoreError::Connection` if the connection is gone
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if !self.is_connected() {
            return Err(CoreError::connection(format!(
                "[{}] connection closed",
                self.name
            )));
        }

        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.lock().insert(id, response_tx);

        let request = JsonRpcRequest::new(RequestId::Number(id), method, params);
        if let Err(e) = self.send(&request) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.abandon(id, "request cancelled by client");
                Err(CoreError::cancelled(format!("{method} cancelled")))
            }
            response = response_rx => response.unwrap_or_else(|_| {
                Err(CoreError::connection(format!("[{}] connection closed", self.name)))
            }),
            () = deadline => {
                self.abandon(id, "request timed out");
                let limit = timeout.unwrap_or_default();
                Err(CoreError::timeout(format!("{method} timed out after {limit:?}")))
            }
        }
    }

    /// Send a notification
    ///
    /// # Errors
    /// Returns `CoreError::Connection` if the connection is gone
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(&JsonRpcNotification::new(method, params))
    }

    /// Close the transport and fail all pending requests
    ///
    /// # Errors
    /// Returns error if the transport fails to close cleanly
    pub async fn close(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let result = if self.outgoing.send(Outgoing::Close(ack_tx)).is_ok() {
            match tokio::time::timeout(CLOSE_TIMEOUT, ack_rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Ok(()),
                Err(_) => Err(CoreError::timeout(format!(
                    "[{}] close timed out after {CLOSE_TIMEOUT:?}",
                    self.name
                ))),
            }
        } else {
            Ok(())
        };

        self.disconnected.cancel();
        if let Some(task) = self.dispatch_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().take() {
            task.abort();
        }
        fail_pending(&self.pending, &self.name);
        result
    }

    fn send<M: serde::Serialize>(&self, message: &M) -> Result<()> {
        let line = serde_json::to_string(message)?;
        self.outgoing
            .send(Outgoing::Message(line))
            .map_err(|_| CoreError::connection(format!("[{}] connection closed", self.name)))
    }

    fn abandon(&self, id: u64, reason: &str) {
        self.pending.lock().remove(&id);
        let params = json!({"requestId": id, "reason": reason});
        if let Err(e) = self.notify("notifications/cancelled", Some(params)) {
            log::debug!("[{}] Could not send cancellation for {id}: {e}", self.name);
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(task) = self.dispatch_task.get_mut().take() {
            task.abort();
        }
        // The writer is left running: it exits once every outgoing sender is
        // gone and closes the transport on the way out.
    }
}

async fn write_loop<T: Transport>(
    name: String,
    mut transport: T,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    disconnected: CancellationToken,
) {
    while let Some(message) = outgoing.recv().await {
        match message {
            Outgoing::Message(line) => {
                if let Err(e) = transport.write(&line).await {
                    log::warn!("[{name}] Write failed: {e}");
                    disconnected.cancel();
                    break;
                }
            }
            Outgoing::Close(ack) => {
                let _ = ack.send(transport.close().await);
                return;
            }
        }
    }

    if let Err(e) = transport.close().await {
        log::debug!("[{name}] Close after writer exit failed: {e}");
    }
}

async fn dispatch_loop(
    name: String,
    mut incoming: mpsc::UnboundedReceiver<Result<Value>>,
    pending: Arc<Mutex<PendingMap>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    disconnected: CancellationToken,
) {
    while let Some(next) = incoming.recv().await {
        let value = match next {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[{name}] Transport error: {e}");
                continue;
            }
        };

        match IncomingMessage::from_value(value) {
            Ok(IncomingMessage::Response(response)) => {
                let RequestId::Number(id) = response.id else {
                    log::warn!("[{name}] Response with unknown id {}", response.id);
                    continue;
                };
                let waiter = pending.lock().remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.into_result());
                    }
                    None => log::debug!("[{name}] Late response for request {id}"),
                }
            }
            Ok(IncomingMessage::Request(request)) => {
                let reply = if request.method == "ping" {
                    JsonRpcResponse::success(request.id, json!({}))
                } else {
                    log::debug!("[{name}] Rejecting server request {}", request.method);
                    JsonRpcResponse::failure(request.id, METHOD_NOT_FOUND, "Method not found")
                };
                match serde_json::to_string(&reply) {
                    Ok(line) => {
                        let _ = outgoing.send(Outgoing::Message(line));
                    }
                    Err(e) => log::warn!("[{name}] Could not encode reply: {e}"),
                }
            }
            Ok(IncomingMessage::Notification(notification)) => {
                log::debug!("[{name}] Notification {}", notification.method);
            }
            Err(e) => log::warn!("[{name}] Ignoring message: {e}"),
        }
    }

    log::debug!("[{name}] Server stream ended");
    disconnected.cancel();
    fail_pending(&pending, &name);
}

fn fail_pending(pending: &Mutex<PendingMap>, name: &str) {
    let drained: Vec<_> = pending.lock().drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(CoreError::connection(format!(
            "[{name}] connection closed"
        ))));
    }
}
