//! Read a file from the workspace with optional offset/limit windowing.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

pub struct ReadFileTool;

#[derive(Deserialize)]
struct ReadFileArgs {
    file_path: String,
    /// 1-based line to start from.
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Returns numbered lines; use offset and limit to window large files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file, relative to the workspace"},
                "offset": {"type": "integer", "description": "1-based line number to start reading from"},
                "limit": {"type": "integer", "description": "Maximum number of lines to return"},
            },
            "required": ["file_path"],
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: ReadFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let path = match context.resolve_path(&args.file_path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        if !path.is_file() {
            return ToolOutcome::err(format!("File not found: {}", args.file_path));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return ToolOutcome::err(format!("Failed to read file: {e}")),
        };
        let Ok(text) = String::from_utf8(bytes) else {
            return ToolOutcome::err("Cannot read file as text (binary file?)");
        };

        let offset = args.offset.unwrap_or(1).max(1);
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();
        if offset > total && total > 0 {
            return ToolOutcome::err(format!(
                "Offset {offset} is past the end of the file ({total} lines)"
            ));
        }

        let window = lines
            .iter()
            .enumerate()
            .skip(offset - 1)
            .take(args.limit.unwrap_or(usize::MAX));

        let mut output = String::new();
        for (i, line) in window {
            output.push_str(&format!("{:6}\t{}\n", i + 1, line));
        }
        ToolOutcome::ok(output).with_metadata("total_lines", json!(total))
    }
}
