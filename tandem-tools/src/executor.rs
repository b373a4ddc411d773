//! Tool execution with a permission gate.
//!
//! Tools that mutate state require approval before they run. Approvals
//! live in memory only: a session-scoped set and an always-approved set,
//! both reset when the process restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::ToolContext;
use crate::registry::ToolRegistry;
use crate::schema::validate_arguments;
use crate::types::ToolOutcome;

/// A tool call held up waiting for user approval.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPermission {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    always_approved: RwLock<HashSet<String>>,
    session_approved: RwLock<HashSet<(String, String)>>,
    pending: RwLock<HashMap<String, PendingPermission>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            always_approved: RwLock::new(HashSet::new()),
            session_approved: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Pre-approve a tool for every session (e.g. from configuration).
    pub fn allow_always(&self, tool_name: &str) {
        self.always_approved.write().insert(tool_name.to_string());
    }

    fn needs_permission(&self, session_id: &str, tool_name: &str, requires: bool) -> bool {
        if !requires {
            return false;
        }
        if self.always_approved.read().contains(tool_name) {
            return false;
        }
        !self
            .session_approved
            .read()
            .contains(&(session_id.to_string(), tool_name.to_string()))
    }

    /// Human-readable summary shown with a permission request.
    fn describe(tool_name: &str, arguments: &Value) -> String {
        if tool_name == "bash" {
            let command = arguments["command"].as_str().unwrap_or_default();
            let head: String = command.chars().take(100).collect();
            return format!("Execute command: {head}");
        }
        if let Some(path) = arguments
            .get("file_path")
            .or_else(|| arguments.get("path"))
            .and_then(Value::as_str)
        {
            return format!("{tool_name}: {path}");
        }
        format!("Execute {tool_name}")
    }

    /// Run a single tool call through lookup, validation, the permission
    /// gate, and execution. Every failure mode comes back as an error
    /// outcome; this function does not return `Err`.
    pub async fn execute_tool(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: Value,
        context: &ToolContext,
    ) -> ToolOutcome {
        let Some(tool) = self.registry.get(tool_name) else {
            return ToolOutcome::err(format!("Tool not found: {tool_name}"));
        };

        if let Err(e) = validate_arguments(&tool.input_schema(), &arguments) {
            return ToolOutcome::err(e.to_string());
        }

        if self.needs_permission(session_id, tool_name, tool.requires_permission()) {
            let record = PendingPermission {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                tool_name: tool_name.to_string(),
                arguments: arguments.clone(),
                description: Self::describe(tool_name, &arguments),
                created_at: Utc::now(),
            };
            let id = record.id.clone();
            tracing::info!(tool = tool_name, request_id = %id, "tool call awaiting permission");
            self.pending.write().insert(id.clone(), record);
            return ToolOutcome::err(format!(
                "Permission required for {tool_name}. Request ID: {id}"
            ))
            .with_metadata("permission_request_id", json!(id));
        }

        tracing::debug!(tool = tool_name, "executing tool");
        tool.execute(arguments, context).await
    }

    /// Run several tool calls in parallel, preserving input order.
    pub async fn execute_tools(
        &self,
        session_id: &str,
        calls: &[(String, Value)],
        context: &ToolContext,
    ) -> Vec<ToolOutcome> {
        let futures = calls
            .iter()
            .map(|(name, arguments)| {
                self.execute_tool(session_id, name, arguments.clone(), context)
            })
            .collect::<Vec<_>>();
        futures::future::join_all(futures).await
    }

    /// Approve a pending request. `always` widens the approval beyond the
    /// requesting session. Returns the held call so it can be re-run.
    pub fn approve(&self, request_id: &str, always: bool) -> Option<PendingPermission> {
        let record = self.pending.write().remove(request_id)?;
        if always {
            self.always_approved.write().insert(record.tool_name.clone());
        } else {
            self.session_approved
                .write()
                .insert((record.session_id.clone(), record.tool_name.clone()));
        }
        Some(record)
    }

    /// Deny a pending request, returning the held call for reporting.
    pub fn deny(&self, request_id: &str) -> Option<PendingPermission> {
        self.pending.write().remove(request_id)
    }

    pub fn pending_for_session(&self, session_id: &str) -> Vec<PendingPermission> {
        self.pending
            .read()
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn executor() -> (TempDir, ToolContext, ToolExecutor) {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path()).unwrap();
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::with_builtins()));
        (dir, ctx, executor)
    }

    #[tokio::test]
    async fn ungated_tool_runs_directly() {
        let (dir, ctx, executor) = executor();
        std::fs::write(dir.path().join("a.txt"), "content\n").unwrap();
        let outcome = executor
            .execute_tool("s1", "read_file", json!({"file_path": "a.txt"}), &ctx)
            .await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn gated_tool_yields_pending_permission() {
        let (_dir, ctx, executor) = executor();
        let outcome = executor
            .execute_tool("s1", "bash", json!({"command": "echo hi"}), &ctx)
            .await;
        assert!(!outcome.success);
        let message = outcome.error.as_deref().unwrap();
        assert!(message.starts_with("Permission required for bash. Request ID: "));

        let pending = executor.pending_for_session("s1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].tool_name, "bash");
        assert_eq!(pending[0].description, "Execute command: echo hi");
    }

    #[tokio::test]
    async fn approval_unlocks_the_session() {
        let (_dir, ctx, executor) = executor();
        let outcome = executor
            .execute_tool("s1", "bash", json!({"command": "echo hi"}), &ctx)
            .await;
        let id = outcome.metadata["permission_request_id"].as_str().unwrap();

        let record = executor.approve(id, false).unwrap();
        assert_eq!(record.tool_name, "bash");
        assert!(executor.pending_for_session("s1").is_empty());

        let rerun = executor
            .execute_tool("s1", "bash", json!({"command": "echo hi"}), &ctx)
            .await;
        assert!(rerun.success);
        assert_eq!(rerun.output.trim(), "hi");

        // A different session is still gated.
        let other = executor
            .execute_tool("s2", "bash", json!({"command": "echo hi"}), &ctx)
            .await;
        assert!(!other.success);
    }

    #[tokio::test]
    async fn always_approval_covers_other_sessions() {
        let (_dir, ctx, executor) = executor();
        let outcome = executor
            .execute_tool("s1", "bash", json!({"command": "true"}), &ctx)
            .await;
        let id = outcome.metadata["permission_request_id"].as_str().unwrap();
        executor.approve(id, true);

        let other = executor
            .execute_tool("s2", "bash", json!({"command": "true"}), &ctx)
            .await;
        assert!(other.success);
    }

    #[tokio::test]
    async fn deny_removes_the_request() {
        let (_dir, ctx, executor) = executor();
        let outcome = executor
            .execute_tool("s1", "bash", json!({"command": "true"}), &ctx)
            .await;
        let id = outcome.metadata["permission_request_id"].as_str().unwrap();

        let record = executor.deny(id).unwrap();
        assert_eq!(record.tool_name, "bash");
        assert!(executor.pending_for_session("s1").is_empty());
        assert!(executor.deny(id).is_none());
    }

    #[tokio::test]
    async fn unknown_tool_and_bad_arguments_become_error_outcomes() {
        let (_dir, ctx, executor) = executor();
        let missing = executor
            .execute_tool("s1", "no_such_tool", json!({}), &ctx)
            .await;
        assert_eq!(missing.error.as_deref(), Some("Tool not found: no_such_tool"));

        let invalid = executor
            .execute_tool("s1", "read_file", json!({"file_path": 42}), &ctx)
            .await;
        assert!(!invalid.success);
        assert!(invalid.error.unwrap().contains("type string"));
    }

    #[tokio::test]
    async fn parallel_execution_preserves_order() {
        let (dir, ctx, executor) = executor();
        std::fs::write(dir.path().join("a.txt"), "first\n").unwrap();
        let calls = vec![
            ("read_file".to_string(), json!({"file_path": "a.txt"})),
            ("read_file".to_string(), json!({"file_path": "missing.txt"})),
            ("list_directory".to_string(), json!({})),
        ];
        let outcomes = executor.execute_tools("s1", &calls, &ctx).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[2].success);
    }

    #[tokio::test]
    async fn permission_descriptions_for_file_tools() {
        let (_dir, ctx, executor) = executor();
        executor
            .execute_tool(
                "s1",
                "write_file",
                json!({"file_path": "out.txt", "content": "x"}),
                &ctx,
            )
            .await;
        let pending = executor.pending_for_session("s1");
        assert_eq!(pending[0].description, "write_file: out.txt");
    }
}
