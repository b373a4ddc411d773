//! Transport layer for MCP communication.
//!
//! A transport carries framed JSON messages in both directions: outbound
//! via [`Transport::send`], inbound through the `mpsc::Receiver<String>`
//! handed back at construction. Request/response correlation happens a
//! layer up, in the multiplexer.

mod sse;
mod stdio;

pub use sse::SseTransport;
pub use stdio::StdioTransport;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{McpError, McpResult};

/// Capacity of the inbound message channel.
const INBOUND_BUFFER: usize = 64;

/// Shell metacharacters rejected in stdio server commands and arguments.
const SHELL_METACHARACTERS: [char; 9] = [';', '&', '|', '$', '`', '(', ')', '{', '}'];

/// Bidirectional message transport for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one framed message.
    async fn send(&self, message: &str) -> McpResult<()>;

    /// Close the transport, releasing any held process or connection.
    async fn close(&self) -> McpResult<()>;
}

/// How to reach an MCP server.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Spawn a subprocess and speak newline-delimited JSON over its pipes.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Connect to a remote endpoint over SSE + HTTP POST.
    Sse {
        endpoint: String,
        headers: HashMap<String, String>,
    },
}

impl TransportConfig {
    /// Reject stdio commands that smuggle shell metacharacters.
    pub fn validate(&self) -> McpResult<()> {
        if let TransportConfig::Stdio { command, args, .. } = self {
            for token in std::iter::once(command.as_str()).chain(args.iter().map(String::as_str)) {
                if token.contains(SHELL_METACHARACTERS) {
                    return Err(McpError::InvalidConfig(format!(
                        "shell metacharacters are not allowed in server commands: {token:?}"
                    )));
                }
            }
            if command.trim().is_empty() {
                return Err(McpError::InvalidConfig("empty server command".to_string()));
            }
        }
        Ok(())
    }

    /// Build the transport and its inbound message stream.
    pub async fn connect(&self) -> McpResult<(Arc<dyn Transport>, mpsc::Receiver<String>)> {
        self.validate()?;
        match self {
            TransportConfig::Stdio { command, args, env } => {
                let (transport, inbound) = StdioTransport::spawn(command, args, env).await?;
                Ok((Arc::new(transport), inbound))
            }
            TransportConfig::Sse { endpoint, headers } => {
                let (transport, inbound) = SseTransport::connect(endpoint, headers)?;
                Ok((Arc::new(transport), inbound))
            }
        }
    }
}

pub(crate) fn inbound_channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(INBOUND_BUFFER)
}
