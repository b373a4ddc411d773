//! Directory listing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

pub struct ListDirectoryTool;

#[derive(Deserialize)]
struct ListDirectoryArgs {
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a directory in the workspace."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: workspace root)"},
            },
            "required": [],
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: ListDirectoryArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let path = match context.resolve_path(args.path.as_deref().unwrap_or(".")) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        if !path.is_dir() {
            return ToolOutcome::err(format!("Not a directory: {}", context.display_path(&path).display()));
        }

        let mut entries = Vec::new();
        let mut reader = match tokio::fs::read_dir(&path).await {
            Ok(reader) => reader,
            Err(e) => return ToolOutcome::err(format!("Failed to read directory: {e}")),
        };
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(meta) => entries.push((name, meta.is_dir(), meta.len())),
                Err(_) => entries.push((name, false, 0)),
            }
        }

        // Directories first, then files, each alphabetical.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        if entries.is_empty() {
            return ToolOutcome::ok("(empty directory)");
        }
        let lines: Vec<String> = entries
            .iter()
            .map(|(name, is_dir, size)| {
                if *is_dir {
                    format!("[dir] {name}")
                } else {
                    format!("[file] {name} ({size} bytes)")
                }
            })
            .collect();
        ToolOutcome::ok(lines.join("\n")).with_metadata("entry_count", json!(entries.len()))
    }
}
