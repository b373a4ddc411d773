//! A managed connection to one MCP server.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected`, or `Error` when the
//! handshake fails. Capability discovery runs eagerly after the handshake
//! but is never fatal; a server with a broken `tools/list` still connects.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::error::{McpError, McpResult};
use crate::multiplex::RequestMultiplexer;
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, RemotePrompt, RemoteResource, RemoteTool, ServerCapabilities, ServerInfo,
    ToolCallResult,
};
use crate::transport::{Transport, TransportConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of a connection's current state and discovered capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub state: ConnectionState,
    pub server_info: Option<ServerInfo>,
    pub capabilities: Option<ServerCapabilities>,
    pub tools: Vec<RemoteTool>,
    pub resources: Vec<RemoteResource>,
    pub prompts: Vec<RemotePrompt>,
    pub error_message: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    state: Option<ConnectionState>,
    transport: Option<Arc<dyn Transport>>,
    mux: Option<Arc<RequestMultiplexer>>,
    server_info: Option<ServerInfo>,
    capabilities: Option<ServerCapabilities>,
    tools: Vec<RemoteTool>,
    resources: Vec<RemoteResource>,
    prompts: Vec<RemotePrompt>,
    error_message: Option<String>,
    connected_at: Option<DateTime<Utc>>,
    last_ping: Option<DateTime<Utc>>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.state.unwrap_or(ConnectionState::Disconnected)
    }
}

pub struct McpConnection {
    name: String,
    config: TransportConfig,
    inner: RwLock<Inner>,
}

impl McpConnection {
    pub fn new(name: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build the configured transport and run the handshake.
    pub async fn connect(&self) -> McpResult<()> {
        let (transport, inbound) = match self.config.connect().await {
            Ok(parts) => parts,
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.state = Some(ConnectionState::Error);
                inner.error_message = Some(e.to_string());
                return Err(e);
            }
        };
        self.connect_with(transport, inbound).await
    }

    /// Run the handshake over an already-built transport.
    pub async fn connect_with(
        &self,
        transport: Arc<dyn Transport>,
        inbound: mpsc::Receiver<String>,
    ) -> McpResult<()> {
        {
            let mut inner = self.inner.write().await;
            inner.state = Some(ConnectionState::Connecting);
            inner.error_message = None;
        }

        let mux = Arc::new(RequestMultiplexer::new(transport.clone(), inbound));

        let init: InitializeResult = match mux
            .request("initialize", Some(InitializeParams::default()))
            .await
        {
            Ok(init) => init,
            Err(e) => {
                mux.shutdown().await;
                let _ = transport.close().await;
                let mut inner = self.inner.write().await;
                inner.state = Some(ConnectionState::Error);
                inner.error_message = Some(e.to_string());
                return Err(e);
            }
        };
        if let Err(e) = mux.notify("notifications/initialized", None::<Value>).await {
            mux.shutdown().await;
            let _ = transport.close().await;
            let mut inner = self.inner.write().await;
            inner.state = Some(ConnectionState::Error);
            inner.error_message = Some(e.to_string());
            return Err(e);
        }

        tracing::info!(
            server = %self.name,
            remote = %init.server_info.name,
            protocol = %init.protocol_version,
            "MCP server connected"
        );

        // Discovery is best-effort; a failing listing leaves that list empty.
        let tools = match mux.request::<Value, ListToolsResult>("tools/list", None).await {
            Ok(r) => r.tools,
            Err(e) => {
                tracing::warn!(server = %self.name, "tools/list failed: {e}");
                Vec::new()
            }
        };
        let resources = match mux
            .request::<Value, ListResourcesResult>("resources/list", None)
            .await
        {
            Ok(r) => r.resources,
            Err(e) => {
                tracing::debug!(server = %self.name, "resources/list failed: {e}");
                Vec::new()
            }
        };
        let prompts = match mux
            .request::<Value, ListPromptsResult>("prompts/list", None)
            .await
        {
            Ok(r) => r.prompts,
            Err(e) => {
                tracing::debug!(server = %self.name, "prompts/list failed: {e}");
                Vec::new()
            }
        };

        let mut inner = self.inner.write().await;
        inner.state = Some(ConnectionState::Connected);
        inner.transport = Some(transport);
        inner.mux = Some(mux);
        inner.server_info = Some(init.server_info);
        inner.capabilities = Some(init.capabilities);
        inner.tools = tools;
        inner.resources = resources;
        inner.prompts = prompts;
        inner.connected_at = Some(Utc::now());
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state()
    }

    /// Tools discovered at connect time.
    pub async fn tools(&self) -> Vec<RemoteTool> {
        self.inner.read().await.tools.clone()
    }

    /// Invoke a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> McpResult<ToolCallResult> {
        let mux = self
            .inner
            .read()
            .await
            .mux
            .clone()
            .ok_or_else(|| McpError::NotConnected(self.name.clone()))?;
        mux.request(
            "tools/call",
            Some(CallToolParams {
                name: name.to_string(),
                arguments,
            }),
        )
        .await
    }

    /// Measure round-trip latency in milliseconds.
    ///
    /// Never fails: an unreachable or disconnected server reports `-1.0`.
    pub async fn ping(&self) -> f64 {
        let Some(mux) = self.inner.read().await.mux.clone() else {
            return -1.0;
        };
        let started = Instant::now();
        match mux.request::<Value, Value>("ping", None).await {
            Ok(_) => {
                let latency = started.elapsed().as_secs_f64() * 1000.0;
                self.inner.write().await.last_ping = Some(Utc::now());
                latency
            }
            Err(e) => {
                tracing::warn!(server = %self.name, "ping failed: {e}");
                -1.0
            }
        }
    }

    pub async fn last_ping(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_ping
    }

    /// Tear the connection down. Safe to call repeatedly.
    pub async fn disconnect(&self) -> McpResult<()> {
        let (mux, transport) = {
            let mut inner = self.inner.write().await;
            inner.state = Some(ConnectionState::Disconnected);
            inner.server_info = None;
            inner.capabilities = None;
            inner.tools.clear();
            inner.resources.clear();
            inner.prompts.clear();
            inner.connected_at = None;
            (inner.mux.take(), inner.transport.take())
        };
        if let Some(mux) = mux {
            mux.shutdown().await;
        }
        if let Some(transport) = transport {
            transport.close().await?;
        }
        tracing::info!(server = %self.name, "MCP server disconnected");
        Ok(())
    }

    /// Snapshot of the connection for status reporting.
    pub async fn info(&self) -> ConnectionInfo {
        let inner = self.inner.read().await;
        ConnectionInfo {
            server_name: self.name.clone(),
            state: inner.state(),
            server_info: inner.server_info.clone(),
            capabilities: inner.capabilities.clone(),
            tools: inner.tools.clone(),
            resources: inner.resources.clone(),
            prompts: inner.prompts.clone(),
            error_message: inner.error_message.clone(),
            connected_at: inner.connected_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;

    /// In-process MCP server: answers the handshake and a small tool set.
    pub(crate) struct ScriptedServer {
        inbound_tx: mpsc::Sender<String>,
        pub fail_tools_list: bool,
        pub fail_ping: bool,
        fail_initialized: bool,
    }

    impl ScriptedServer {
        pub fn start(
            fail_tools_list: bool,
            fail_ping: bool,
        ) -> (Arc<dyn Transport>, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel(32);
            (
                Arc::new(Self {
                    inbound_tx: tx,
                    fail_tools_list,
                    fail_ping,
                    fail_initialized: false,
                }),
                rx,
            )
        }

        /// Answers the initialize request but rejects the follow-up
        /// `notifications/initialized` send.
        pub fn start_failing_initialized() -> (Arc<dyn Transport>, mpsc::Receiver<String>) {
            let (tx, rx) = mpsc::channel(32);
            (
                Arc::new(Self {
                    inbound_tx: tx,
                    fail_tools_list: false,
                    fail_ping: false,
                    fail_initialized: true,
                }),
                rx,
            )
        }

        fn reply_for(&self, method: &str) -> Value {
            match method {
                "initialize" => json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "scripted", "version": "0.0.1"}
                }),
                "tools/list" => json!({
                    "tools": [{"name": "echo", "description": "echo", "inputSchema": {"type": "object"}}]
                }),
                "resources/list" => json!({"resources": []}),
                "prompts/list" => json!({"prompts": []}),
                "ping" => json!({}),
                "tools/call" => json!({
                    "content": [{"type": "text", "text": "echoed"}],
                    "isError": false
                }),
                _ => json!({}),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedServer {
        async fn send(&self, message: &str) -> McpResult<()> {
            let request: Value = serde_json::from_str(message)?;
            let Some(id) = request.get("id").and_then(Value::as_u64) else {
                if self.fail_initialized
                    && request["method"].as_str() == Some("notifications/initialized")
                {
                    return Err(McpError::ConnectionFailed("scripted send failure".to_string()));
                }
                return Ok(()); // notification
            };
            let method = request["method"].as_str().unwrap_or_default();
            let reply = if (method == "tools/list" && self.fail_tools_list)
                || (method == "ping" && self.fail_ping)
            {
                json!({"jsonrpc": "2.0", "id": id, "error": {"code": -1, "message": "scripted failure"}})
            } else {
                json!({"jsonrpc": "2.0", "id": id, "result": self.reply_for(method)})
            };
            let _ = self.inbound_tx.send(reply.to_string()).await;
            Ok(())
        }

        async fn close(&self) -> McpResult<()> {
            Ok(())
        }
    }

    fn dummy_config() -> TransportConfig {
        TransportConfig::Stdio {
            command: "unused".to_string(),
            args: Vec::new(),
            env: Default::default(),
        }
    }

    #[tokio::test]
    async fn handshake_discovers_capabilities() {
        let conn = McpConnection::new("test", dummy_config());
        let (transport, inbound) = ScriptedServer::start(false, false);
        conn.connect_with(transport, inbound).await.unwrap();

        assert_eq!(conn.state().await, ConnectionState::Connected);
        let info = conn.info().await;
        assert_eq!(info.server_info.unwrap().name, "scripted");
        assert_eq!(info.tools.len(), 1);
        assert!(info.connected_at.is_some());
    }

    #[tokio::test]
    async fn discovery_failure_is_not_fatal() {
        let conn = McpConnection::new("test", dummy_config());
        let (transport, inbound) = ScriptedServer::start(true, false);
        conn.connect_with(transport, inbound).await.unwrap();

        assert_eq!(conn.state().await, ConnectionState::Connected);
        assert!(conn.tools().await.is_empty());
    }

    #[tokio::test]
    async fn ping_reports_latency_or_sentinel() {
        let conn = McpConnection::new("test", dummy_config());
        let (transport, inbound) = ScriptedServer::start(false, false);
        conn.connect_with(transport, inbound).await.unwrap();
        assert!(conn.ping().await >= 0.0);
        assert!(conn.last_ping().await.is_some());

        let failing = McpConnection::new("down", dummy_config());
        let (transport, inbound) = ScriptedServer::start(false, true);
        failing.connect_with(transport, inbound).await.unwrap();
        assert_eq!(failing.ping().await, -1.0);
    }

    #[tokio::test]
    async fn initialized_notification_failure_tears_down() {
        let conn = McpConnection::new("test", dummy_config());
        let (transport, inbound) = ScriptedServer::start_failing_initialized();
        assert!(conn.connect_with(transport, inbound).await.is_err());

        assert_eq!(conn.state().await, ConnectionState::Error);
        let info = conn.info().await;
        assert!(info.error_message.is_some());
        // No multiplexer survives the failed handshake.
        assert!(matches!(
            conn.call_tool("echo", None).await,
            Err(McpError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn call_tool_requires_connection() {
        let conn = McpConnection::new("test", dummy_config());
        assert!(matches!(
            conn.call_tool("echo", None).await,
            Err(McpError::NotConnected(_))
        ));

        let (transport, inbound) = ScriptedServer::start(false, false);
        conn.connect_with(transport, inbound).await.unwrap();
        let result = conn.call_tool("echo", Some(json!({"text": "hi"}))).await.unwrap();
        assert_eq!(result.text(), "echoed");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_clears_state() {
        let conn = McpConnection::new("test", dummy_config());
        let (transport, inbound) = ScriptedServer::start(false, false);
        conn.connect_with(transport, inbound).await.unwrap();

        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(conn.state().await, ConnectionState::Disconnected);
        assert!(conn.tools().await.is_empty());
        assert_eq!(conn.ping().await, -1.0);
    }
}
