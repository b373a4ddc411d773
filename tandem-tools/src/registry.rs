//! Tool registry: builtins plus MCP-backed tools under one namespace.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tandem_mcp::{ConnectionManager, RemoteTool};

use crate::builtins::{
    BashTool, EditFileTool, GlobTool, GrepTool, ListDirectoryTool, ReadFileTool, WebFetchTool,
    WebSearchTool, WriteFileTool,
};
use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome, ToolSpec};

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with every builtin tool.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(EditFileTool));
        registry.register(Arc::new(ListDirectoryTool));
        registry.register(Arc::new(GlobTool));
        registry.register(Arc::new(GrepTool));
        registry.register(Arc::new(BashTool));
        registry.register(Arc::new(WebFetchTool::default()));
        registry.register(Arc::new(WebSearchTool));
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    /// Specs for every registered tool, sorted by name.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.read().values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Expose a connected server's tools as `mcp__{server}__{tool}`.
    pub fn register_mcp_tools(
        &self,
        manager: Arc<ConnectionManager>,
        server: &str,
        tools: Vec<RemoteTool>,
    ) {
        for remote in tools {
            tracing::debug!(server, tool = %remote.name, "registering MCP tool");
            self.register(Arc::new(McpProxyTool::new(manager.clone(), server, remote)));
        }
    }
}

/// A tool that proxies execution to an MCP server.
struct McpProxyTool {
    manager: Arc<ConnectionManager>,
    server: String,
    remote: RemoteTool,
    name: String,
    description: String,
}

impl McpProxyTool {
    fn new(manager: Arc<ConnectionManager>, server: &str, remote: RemoteTool) -> Self {
        let name = format!("mcp__{server}__{}", remote.name);
        let description = remote
            .description
            .clone()
            .unwrap_or_else(|| format!("Tool '{}' from MCP server '{server}'", remote.name));
        Self {
            manager,
            server: server.to_string(),
            remote,
            name,
            description,
        }
    }
}

#[async_trait]
impl Tool for McpProxyTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        if self.remote.input_schema.is_object() {
            self.remote.input_schema.clone()
        } else {
            json!({"type": "object", "properties": {}})
        }
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolOutcome {
        match self
            .manager
            .call_tool(&self.server, &self.remote.name, Some(arguments))
            .await
        {
            Ok(result) => {
                let text = result.text();
                if result.is_error {
                    ToolOutcome::err(text)
                } else {
                    ToolOutcome::ok(text)
                }
            }
            Err(e) => ToolOutcome::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn builtins_are_registered() {
        let registry = ToolRegistry::with_builtins();
        let names = registry.names();
        for expected in [
            "bash",
            "edit_file",
            "glob",
            "grep",
            "list_directory",
            "read_file",
            "web_fetch",
            "web_search",
            "write_file",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn specs_flag_permission_gated_tools() {
        let registry = ToolRegistry::with_builtins();
        let specs = registry.specs();
        let by_name = |n: &str| specs.iter().find(|s| s.name == n).unwrap();
        assert!(by_name("bash").requires_permission);
        assert!(by_name("write_file").requires_permission);
        assert!(!by_name("read_file").requires_permission);
    }

    #[tokio::test]
    async fn mcp_tools_get_namespaced_names() {
        let registry = ToolRegistry::new();
        let manager = Arc::new(ConnectionManager::new());
        registry.register_mcp_tools(
            manager,
            "github",
            vec![RemoteTool {
                name: "create_issue".to_string(),
                description: Some("Create an issue".to_string()),
                input_schema: json!({"type": "object"}),
            }],
        );

        let tool = registry.get("mcp__github__create_issue").unwrap();
        assert_eq!(tool.description(), "Create an issue");

        // The backing server is not connected; execution degrades to an
        // error outcome rather than a panic.
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path()).unwrap();
        let outcome = tool.execute(json!({}), &ctx).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not connected"));
    }
}
