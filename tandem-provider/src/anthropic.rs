//! Anthropic Messages API adapter.
//!
//! Maps the Anthropic SSE wire format (`message_start`,
//! `content_block_start`, `input_json_delta`, ...) onto the unified
//! [`StreamEvent`] model.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::Provider;
use crate::stream::{EventStream, StreamEvent};
use crate::types::{
    CompletionOptions, CompletionResponse, ContentBlock, Message, ModelInfo, Role, ToolDefinition,
    Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// (id, display name, context window, max output tokens)
const MODELS: &[(&str, &str, u32, u32)] = &[
    ("claude-opus-4-20250514", "Claude Opus 4", 200_000, 32_000),
    ("claude-sonnet-4-20250514", "Claude Sonnet 4", 200_000, 64_000),
    ("claude-3-5-haiku-20241022", "Claude 3.5 Haiku", 200_000, 8_192),
];

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str) -> ProviderResult<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|_| ProviderError::Authentication("invalid API key format".to_string()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Split system text out and render the rest in Anthropic block shape.
    fn convert_messages(messages: &[Message], options: &CompletionOptions) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = options.system.iter().cloned().collect();
        let mut wire = Vec::new();

        for message in messages {
            if message.role == Role::System {
                system_parts.push(message.text());
                continue;
            }
            let blocks: Vec<Value> = message
                .content
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                    ContentBlock::ToolUse { id, name, input } => {
                        json!({"type": "tool_use", "id": id, "name": name, "input": input})
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": content,
                        "is_error": is_error,
                    }),
                })
                .collect();
            wire.push(json!({"role": message.role.to_string(), "content": blocks}));
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, wire)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect()
    }

    fn build_request(
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &CompletionOptions,
        stream: bool,
    ) -> Value {
        let (system, wire_messages) = Self::convert_messages(messages, options);
        let mut body = json!({
            "model": model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": wire_messages,
            "stream": stream,
        });
        if let Some(system) = system {
            body["system"] = Value::String(system);
        }
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = Value::Array(Self::convert_tools(tools));
            }
        }
        body
    }

    fn map_error(model: &str, status: u16, body: String) -> ProviderError {
        match status {
            401 | 403 => ProviderError::Authentication(body),
            429 => ProviderError::RateLimit(body),
            404 => ProviderError::UnknownModel(model.to_string()),
            400 if body.contains("model") && body.contains("not_found") => {
                ProviderError::UnknownModel(model.to_string())
            }
            400 => ProviderError::InvalidRequest(body),
            _ => ProviderError::Api {
                provider: "anthropic".to_string(),
                status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &CompletionOptions,
    ) -> ProviderResult<CompletionResponse> {
        let body = Self::build_request(model, messages, tools, options, false);
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Self::map_error(model, status.as_u16(), text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::Parse(format!("{e}: {text}")))?;

        let content = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| match b["type"].as_str() {
                        Some("text") => Some(ContentBlock::Text {
                            text: b["text"].as_str().unwrap_or_default().to_string(),
                        }),
                        Some("tool_use") => Some(ContentBlock::ToolUse {
                            id: b["id"].as_str().unwrap_or_default().to_string(),
                            name: b["name"].as_str().unwrap_or_default().to_string(),
                            input: b["input"].clone(),
                        }),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            stop_reason: parsed["stop_reason"].as_str().map(String::from),
            usage: parsed.get("usage").map(|u| Usage {
                input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            }),
            model: parsed["model"].as_str().unwrap_or(model).to_string(),
        })
    }

    async fn stream_complete(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        options: &CompletionOptions,
    ) -> ProviderResult<EventStream> {
        let body = Self::build_request(model, messages, tools, options, true);
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::map_error(model, status.as_u16(), text));
        }

        let (tx, rx) = mpsc::channel::<ProviderResult<StreamEvent>>(64);
        tokio::spawn(async move {
            let mut mapper = SseEventMapper::default();
            let mut buffer = String::new();
            let mut bytes = response.bytes_stream();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(ProviderError::Request(e))).await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line: String = buffer.drain(..=pos).collect();
                    let line = line.trim_end();
                    if let Some(data) = line.strip_prefix("data: ") {
                        for event in mapper.handle(data) {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn models(&self) -> Vec<ModelInfo> {
        MODELS
            .iter()
            .map(|(id, name, context_window, max_output_tokens)| ModelInfo {
                id: (*id).to_string(),
                name: (*name).to_string(),
                context_window: *context_window,
                max_output_tokens: *max_output_tokens,
                supports_tools: true,
                supports_vision: true,
            })
            .collect()
    }
}

struct ToolBlock {
    id: String,
    buffer: String,
}

/// Translates one Anthropic SSE payload into zero or more stream events.
#[derive(Default)]
struct SseEventMapper {
    tool_blocks: HashMap<u64, ToolBlock>,
    input_tokens: u32,
}

impl SseEventMapper {
    fn handle(&mut self, payload: &str) -> Vec<StreamEvent> {
        let event: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("skipping malformed SSE payload: {e}");
                return Vec::new();
            }
        };

        match event["type"].as_str() {
            Some("message_start") => {
                self.input_tokens = event["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0) as u32;
                vec![StreamEvent::MessageStart]
            }
            Some("content_block_start") => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    let index = event["index"].as_u64().unwrap_or(0);
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default().to_string();
                    self.tool_blocks.insert(
                        index,
                        ToolBlock {
                            id: id.clone(),
                            buffer: String::new(),
                        },
                    );
                    vec![StreamEvent::ToolUseStart { id, name }]
                } else {
                    Vec::new()
                }
            }
            Some("content_block_delta") => {
                let delta = &event["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => vec![StreamEvent::TextDelta {
                        text: delta["text"].as_str().unwrap_or_default().to_string(),
                    }],
                    Some("input_json_delta") => {
                        let index = event["index"].as_u64().unwrap_or(0);
                        let partial = delta["partial_json"].as_str().unwrap_or_default();
                        if let Some(block) = self.tool_blocks.get_mut(&index) {
                            block.buffer.push_str(partial);
                            vec![StreamEvent::ToolUseDelta {
                                id: block.id.clone(),
                                partial_json: partial.to_string(),
                            }]
                        } else {
                            Vec::new()
                        }
                    }
                    _ => Vec::new(),
                }
            }
            Some("content_block_stop") => {
                let index = event["index"].as_u64().unwrap_or(0);
                match self.tool_blocks.remove(&index) {
                    Some(block) => {
                        let arguments = if block.buffer.trim().is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&block.buffer).unwrap_or_else(|e| {
                                tracing::warn!("unparseable tool input, using empty object: {e}");
                                json!({})
                            })
                        };
                        vec![StreamEvent::ToolUseEnd {
                            id: block.id,
                            arguments: Some(arguments),
                        }]
                    }
                    None => Vec::new(),
                }
            }
            Some("message_delta") => {
                let usage = event.get("usage").map(|u| Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                });
                vec![StreamEvent::MessageDelta {
                    usage,
                    stop_reason: event["delta"]["stop_reason"].as_str().map(String::from),
                }]
            }
            Some("message_stop") => vec![StreamEvent::MessageEnd],
            Some("error") => vec![StreamEvent::Error {
                message: event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string(),
            }],
            _ => Vec::new(), // ping and future event types
        }
    }
}
