//! LLM provider abstraction for tandem.
//!
//! One [`Provider`] trait, one [`StreamEvent`] model, and adapters that
//! translate vendor wire formats into both.

pub mod anthropic;
pub mod error;
pub mod provider;
pub mod stream;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use error::{ProviderError, ProviderResult};
pub use provider::Provider;
pub use stream::{EventStream, StreamEvent, ToolUseAccumulator};
pub use types::{
    CompletionOptions, CompletionResponse, ContentBlock, Message, ModelInfo, Role, ToolDefinition,
    ToolResultBlock, ToolUse, Usage,
};
