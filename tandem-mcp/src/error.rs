//! Error types for MCP operations.

use thiserror::Error;

/// Errors that can occur during MCP operations.
#[derive(Error, Debug)]
pub enum McpError {
    /// Transport-level failure establishing or using a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP request failure from the SSE transport.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Message could not be serialized or parsed as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying IO failure on a transport pipe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server configuration is malformed.
    #[error("Invalid server configuration: {0}")]
    InvalidConfig(String),

    /// Response violated the JSON-RPC framing rules.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server answered a request with a JSON-RPC error object.
    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },

    /// No response arrived within the request deadline.
    #[error("Request timed out: {method}")]
    Timeout { method: String },

    /// Server subprocess could not be started.
    #[error("Failed to spawn server process: {0}")]
    Spawn(String),

    /// Operation requires a live connection to the named server.
    #[error("Server '{0}' is not connected")]
    NotConnected(String),
}

pub type McpResult<T> = Result<T, McpError>;
