//! Registry of named MCP connections.
//!
//! The manager is plain state handed to whoever needs it; there is no
//! process-global instance. One mutex guards structural changes so that a
//! reconnect can never race itself into two live connections for the same
//! name.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::connection::{ConnectionInfo, ConnectionState, McpConnection};
use crate::error::{McpError, McpResult};
use crate::protocol::ToolCallResult;
use crate::transport::TransportConfig;

/// Composite health record for one named server.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub server_name: String,
    pub is_healthy: bool,
    pub state: ConnectionState,
    pub latency_ms: Option<f64>,
    pub last_ping: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct ConnectionManager {
    connections: Mutex<HashMap<String, Arc<McpConnection>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a server, replacing any live connection under the same
    /// name. The previous connection is fully disconnected first.
    ///
    /// The new connection is registered and returned whether or not the
    /// handshake succeeded; the caller checks its resulting state (a
    /// failed connect leaves it in `Error` with the message stored).
    pub async fn connect_server(&self, name: &str, config: TransportConfig) -> Arc<McpConnection> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.remove(name) {
            tracing::info!(server = name, "disconnecting existing connection before reconnect");
            if let Err(e) = existing.disconnect().await {
                tracing::warn!(server = name, "error disconnecting previous connection: {e}");
            }
        }

        let connection = Arc::new(McpConnection::new(name, config));
        if let Err(e) = connection.connect().await {
            tracing::warn!(server = name, "connect failed: {e}");
        }
        connections.insert(name.to_string(), connection.clone());
        connection
    }

    /// Insert an already-established connection, disconnecting any previous
    /// holder of the name.
    pub async fn register(&self, connection: Arc<McpConnection>) {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.remove(connection.name()) {
            if let Err(e) = existing.disconnect().await {
                tracing::warn!(server = connection.name(), "error disconnecting previous connection: {e}");
            }
        }
        connections.insert(connection.name().to_string(), connection);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.connections.lock().await.get(name).cloned()
    }

    /// Disconnect and drop one server. Returns whether it existed.
    pub async fn disconnect_server(&self, name: &str) -> McpResult<bool> {
        let removed = self.connections.lock().await.remove(name);
        match removed {
            Some(connection) => {
                connection.disconnect().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Disconnect every server, logging failures instead of aborting.
    pub async fn disconnect_all(&self) {
        let drained: Vec<_> = self.connections.lock().await.drain().collect();
        for (name, connection) in drained {
            if let Err(e) = connection.disconnect().await {
                tracing::warn!(server = %name, "error during disconnect: {e}");
            }
        }
    }

    /// Snapshots of every registered connection.
    pub async fn list_connections(&self) -> Vec<ConnectionInfo> {
        let connections: Vec<_> = self.connections.lock().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(connections.len());
        for connection in connections {
            infos.push(connection.info().await);
        }
        infos
    }

    /// Invoke a tool on a named server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<Value>,
    ) -> McpResult<ToolCallResult> {
        let connection = self
            .get(server)
            .await
            .ok_or_else(|| McpError::NotConnected(server.to_string()))?;
        connection.call_tool(tool, arguments).await
    }

    /// Check a named server's health.
    pub async fn get_health(&self, name: &str) -> HealthStatus {
        let Some(connection) = self.get(name).await else {
            return HealthStatus {
                server_name: name.to_string(),
                is_healthy: false,
                state: ConnectionState::Disconnected,
                latency_ms: None,
                last_ping: None,
                error: Some("Server not connected".to_string()),
            };
        };

        let latency = connection.ping().await;
        let state = connection.state().await;
        let is_healthy = latency >= 0.0 && state == ConnectionState::Connected;

        HealthStatus {
            server_name: name.to_string(),
            is_healthy,
            state,
            latency_ms: (latency >= 0.0).then_some(latency),
            last_ping: connection.last_ping().await,
            error: if latency < 0.0 {
                Some("Ping failed".to_string())
            } else if state != ConnectionState::Connected {
                Some(format!("Connection state: {state}"))
            } else {
                None
            },
        }
    }
}
