//! Conversation state: ordered messages with tool use and result blocks.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tandem_provider::{ContentBlock, Message, Role, ToolResultBlock, ToolUse, Usage};
use tokio::sync::Mutex;
use uuid::Uuid;

/// One turn of a conversation. Tool results ride a user-role message so
/// the record projects directly into provider wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_uses: Vec::new(),
            tool_results: Vec::new(),
            tokens_used: None,
            created_at: Utc::now(),
            metadata: Map::new(),
        }
    }

    /// Project into provider wire shape.
    pub fn to_provider_message(&self) -> Message {
        let mut content = Vec::new();
        if !self.content.is_empty() {
            content.push(ContentBlock::Text {
                text: self.content.clone(),
            });
        }
        for use_ in &self.tool_uses {
            content.push(ContentBlock::ToolUse {
                id: use_.id.clone(),
                name: use_.name.clone(),
                input: use_.arguments.clone(),
            });
        }
        for result in &self.tool_results {
            content.push(ContentBlock::ToolResult {
                tool_use_id: result.tool_use_id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
        }
        Message {
            role: self.role,
            content,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub total_input_tokens: u64,
    #[serde(default)]
    pub total_output_tokens: u64,
    /// Free-form session metadata (e.g. a todo list kept by the model).
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Conversation {
    pub fn new(
        session_id: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            model: model.into(),
            provider: provider.into(),
            system_prompt: None,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            total_input_tokens: 0,
            total_output_tokens: 0,
            metadata: Map::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn push(&mut self, message: ConversationMessage) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::new(Role::User, content));
    }

    pub fn add_assistant_message(
        &mut self,
        content: impl Into<String>,
        tool_uses: Vec<ToolUse>,
        usage: Option<Usage>,
    ) {
        let mut message = ConversationMessage::new(Role::Assistant, content);
        message.tool_uses = tool_uses;
        if let Some(usage) = usage {
            message.tokens_used = Some(usage.output_tokens);
            self.update_token_usage(usage);
        }
        self.push(message);
    }

    pub fn update_token_usage(&mut self, usage: Usage) {
        self.total_input_tokens += u64::from(usage.input_tokens);
        self.total_output_tokens += u64::from(usage.output_tokens);
    }

    /// Record tool results as a user-role message, answering the previous
    /// assistant message's tool uses.
    pub fn add_tool_results(&mut self, results: Vec<ToolResultBlock>) {
        let mut message = ConversationMessage::new(Role::User, "");
        message.tool_results = results;
        self.push(message);
    }

    pub fn last_assistant(&self) -> Option<&ConversationMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Tool uses from the last assistant message that have not been
    /// answered yet. Empty once a later message carries tool results.
    pub fn pending_tool_uses(&self) -> Vec<ToolUse> {
        let mut pending = Vec::new();
        for message in self.messages.iter().rev() {
            if !message.tool_results.is_empty() {
                return Vec::new();
            }
            if message.role == Role::Assistant {
                pending = message.tool_uses.clone();
                break;
            }
        }
        pending
    }

    /// Message history in provider wire shape. The system prompt is not
    /// included here; providers take it out of band.
    pub fn provider_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(ConversationMessage::to_provider_message)
            .collect()
    }
}

/// In-memory store of live conversations, keyed by session id.
#[derive(Default)]
pub struct ConversationStore {
    conversations: parking_lot::RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation: Conversation) -> Arc<Mutex<Conversation>> {
        let session_id = conversation.session_id.clone();
        let handle = Arc::new(Mutex::new(conversation));
        self.conversations
            .write()
            .insert(session_id, handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<Conversation>>> {
        self.conversations.read().get(session_id).cloned()
    }

    pub fn get_or_create(
        &self,
        session_id: &str,
        build: impl FnOnce() -> Conversation,
    ) -> Arc<Mutex<Conversation>> {
        if let Some(existing) = self.get(session_id) {
            return existing;
        }
        self.insert(build())
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.conversations.write().remove(session_id).is_some()
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.conversations.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
