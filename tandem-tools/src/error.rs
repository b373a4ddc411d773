//! Error types for tool operations.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    /// The tool ran but reported a failure.
    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    /// Arguments did not match the tool's schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// No tool registered under the requested name.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Resolved path lies outside the workspace root.
    #[error("Path escapes the workspace: {0}")]
    PathEscape(PathBuf),

    /// Execution was blocked by the permission gate.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Command exceeded its execution deadline.
    #[error("Command timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Filesystem or subprocess IO failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arguments could not be deserialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Search pattern is not a valid regular expression.
    #[error("Invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),

    /// File pattern is not a valid glob.
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type ToolResult<T> = Result<T, ToolError>;
