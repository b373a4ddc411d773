//! Sandboxed tool engine for tandem.
//!
//! Builtin tools (files, search, shell, web) and MCP-backed tools share
//! one registry and one execution path: schema validation, a permission
//! gate for mutating tools, and a workspace path sandbox.

pub mod builtins;
pub mod context;
pub mod error;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod types;

pub use context::ToolContext;
pub use error::{ToolError, ToolResult};
pub use executor::{PendingPermission, ToolExecutor};
pub use registry::ToolRegistry;
pub use types::{Tool, ToolOutcome, ToolSpec};
