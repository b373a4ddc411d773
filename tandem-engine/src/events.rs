//! Outward events, shaped for SSE delivery to a frontend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    StreamChunk,
    ToolCall,
    ToolResult,
    PermissionRequest,
    Status,
    Error,
    Complete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::StreamChunk => "stream_chunk",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::PermissionRequest => "permission_request",
            EventKind::Status => "status",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        }
    }
}

/// Conversation phases reported through `status` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Thinking,
    ExecutingTools,
    WaitingPermission,
    PermissionDenied,
}

/// One outward event, tagged with its session and emission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EventKind, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            data,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn status(session_id: impl Into<String>, status: EngineStatus) -> Self {
        Self::new(EventKind::Status, session_id, json!({"status": status}))
    }

    /// Render as one SSE frame.
    pub fn to_sse(&self) -> String {
        // Serialization of this shape cannot fail; fall back to an empty
        // object rather than panicking if it ever does.
        let body = serde_json::to_string(self)
            .unwrap_or_else(|_| String::from("{}"));
        format!("data: {body}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_shape() {
        let event = EngineEvent::new(
            EventKind::StreamChunk,
            "sess-1",
            json!({"text": "hello"}),
        );
        let frame = event.to_sse();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));

        let parsed: Value = serde_json::from_str(frame.trim_start_matches("data: ").trim()).unwrap();
        assert_eq!(parsed["type"], "stream_chunk");
        assert_eq!(parsed["session_id"], "sess-1");
        assert_eq!(parsed["data"]["text"], "hello");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn status_event_payload() {
        let event = EngineEvent::status("s", EngineStatus::WaitingPermission);
        assert_eq!(event.data["status"], "waiting_permission");
    }
}
