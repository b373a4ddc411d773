//! Write a file, creating parent directories as needed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

pub struct WriteFileTool;

#[derive(Deserialize)]
struct WriteFileArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace, creating it (and parent directories) if needed. Overwrites existing content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to write, relative to the workspace"},
                "content": {"type": "string", "description": "Full file content"},
            },
            "required": ["file_path", "content"],
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: WriteFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let path = match context.resolve_path(&args.file_path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutcome::err(format!("Failed to create parent directories: {e}"));
            }
        }
        match tokio::fs::write(&path, &args.content).await {
            Ok(()) => ToolOutcome::ok(format!(
                "Successfully wrote {} characters",
                args.content.chars().count()
            )),
            Err(e) => ToolOutcome::err(format!("Failed to write file: {e}")),
        }
    }
}
