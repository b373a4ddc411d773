//! The provider trait: one seam for every LLM vendor.

use async_trait::async_trait;

use crate::error::ProviderResult;
use crate::stream::EventStream;
use crate::types::{CompletionOptions, CompletionResponse, Message, ModelInfo, ToolDefinition};

/// An LLM provider capable of tool-calling completions.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short provider identifier, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Run a completion to... completion.
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &CompletionOptions,
    ) -> ProviderResult<CompletionResponse>;

    /// Run a completion, streaming events as they arrive.
    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &CompletionOptions,
    ) -> ProviderResult<EventStream>;

    /// Models this provider can serve.
    fn models(&self) -> Vec<ModelInfo>;

    fn supports_tools(&self, model: &str) -> bool {
        self.models()
            .iter()
            .any(|m| m.id == model && m.supports_tools)
    }

    fn supports_vision(&self, model: &str) -> bool {
        self.models()
            .iter()
            .any(|m| m.id == model && m.supports_vision)
    }
}
