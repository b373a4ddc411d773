//! Conversation engine for tandem.
//!
//! Ties the provider, tool, and MCP layers together: an [`Orchestrator`]
//! streams completions, executes requested tools (pausing for permission
//! where needed), and emits [`EngineEvent`]s shaped for SSE delivery.

pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod session;

pub use config::{Config, McpServerConfig, ProviderConfig};
pub use conversation::{Conversation, ConversationMessage, ConversationStore};
pub use error::{EngineError, EngineResult};
pub use events::{EngineEvent, EngineStatus, EventKind};
pub use orchestrator::{Orchestrator, MAX_TOOL_ITERATIONS};
pub use session::{SessionRecord, SessionStore};

/// Install the global tracing subscriber, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
