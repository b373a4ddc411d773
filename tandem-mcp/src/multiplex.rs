//! JSON-RPC request multiplexing over a single transport.
//!
//! Many requests can be in flight at once: each outbound request registers
//! a oneshot under its id, and a dispatch task routes inbound responses to
//! whichever caller is waiting. Server-initiated notifications have no id
//! and are logged, not routed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;

/// How long a request may wait for its response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

pub struct RequestMultiplexer {
    transport: Arc<dyn Transport>,
    next_id: AtomicU64,
    pending: PendingMap,
    timeout: Duration,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl RequestMultiplexer {
    pub fn new(transport: Arc<dyn Transport>, inbound: mpsc::Receiver<String>) -> Self {
        Self::with_timeout(transport, inbound, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<String>,
        timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let dispatch = tokio::spawn(dispatch_loop(inbound, pending.clone()));
        Self {
            transport,
            next_id: AtomicU64::new(1),
            pending,
            timeout,
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Send a request and wait for its typed result.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> McpResult<R>
    where
        P: Serialize + Send + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.transport.send(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                // Sender dropped: the connection went away underneath us.
                return Err(McpError::ConnectionFailed(
                    "connection closed before response".to_string(),
                ));
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(McpError::Timeout {
                    method: method.to_string(),
                });
            }
        };

        if let Some(err) = response.error {
            return Err(McpError::Server {
                code: err.code,
                message: err.message,
            });
        }
        Ok(serde_json::from_value(response.result.unwrap_or(Value::Null))?)
    }

    /// Send a notification; no response is expected.
    pub async fn notify<P>(&self, method: &str, params: Option<P>) -> McpResult<()>
    where
        P: Serialize + Send + Sync,
    {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.send(&payload).await
    }

    /// Number of requests still waiting for a response.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Stop dispatching and fail every outstanding request.
    pub async fn shutdown(&self) {
        if let Some(dispatch) = self.dispatch.lock().await.take() {
            dispatch.abort();
        }
        self.pending.lock().await.clear();
    }
}

async fn dispatch_loop(mut inbound: mpsc::Receiver<String>, pending: PendingMap) {
    while let Some(line) = inbound.recv().await {
        match serde_json::from_str::<JsonRpcResponse>(&line) {
            Ok(message) => {
                if let Some(id) = message.id {
                    if let Some(tx) = pending.lock().await.remove(&id) {
                        let _ = tx.send(message);
                    } else {
                        tracing::warn!("response for unknown request id {id}");
                    }
                } else {
                    tracing::debug!(
                        method = message.method.as_deref().unwrap_or("<unnamed>"),
                        "server notification"
                    );
                }
            }
            Err(e) => {
                tracing::warn!("skipping malformed message: {e}");
            }
        }
    }
    // Inbound channel closed: dropping the senders wakes every waiter
    // with a connection-closed error.
    pending.lock().await.clear();
}
