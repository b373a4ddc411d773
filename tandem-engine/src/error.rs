//! Engine-level errors, aggregating every subsystem.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Provider error: {0}")]
    Provider(#[from] tandem_provider::ProviderError),

    #[error("MCP error: {0}")]
    Mcp(#[from] tandem_mcp::McpError),

    #[error("Tool error: {0}")]
    Tool(#[from] tandem_tools::ToolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Unknown permission request: {0}")]
    UnknownPermissionRequest(String),
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
