//! Targeted text replacement within a file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

pub struct EditFileTool;

#[derive(Deserialize)]
struct EditFileArgs {
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. The snippet must match exactly once unless replace_all is set."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Path to the file, relative to the workspace"},
                "old_string": {"type": "string", "description": "Exact text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "description": "Replace every occurrence (default: false)"},
            },
            "required": ["file_path", "old_string", "new_string"],
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: EditFileArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let path = match context.resolve_path(&args.file_path) {
            Ok(path) => path,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => return ToolOutcome::err(format!("Failed to read file: {e}")),
        };

        let count = content.matches(&args.old_string).count();
        if count == 0 {
            let excerpt: String = args.old_string.chars().take(50).collect();
            return ToolOutcome::err(format!("Text not found in file: {excerpt:?}"));
        }
        if count > 1 && !args.replace_all {
            return ToolOutcome::err(format!(
                "Text found {count} times. Use replace_all=true or provide more context."
            ));
        }

        let (updated, replacements) = if args.replace_all {
            (content.replace(&args.old_string, &args.new_string), count)
        } else {
            (content.replacen(&args.old_string, &args.new_string, 1), 1)
        };

        if let Err(e) = tokio::fs::write(&path, updated).await {
            return ToolOutcome::err(format!("Failed to write file: {e}"));
        }
        ToolOutcome::ok(format!("Successfully made {replacements} replacement(s)"))
            .with_metadata("replacements", json!(replacements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn run(content: &str, args: Value) -> (TempDir, ToolOutcome) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file.txt"), content).unwrap();
        let ctx = ToolContext::new(dir.path()).unwrap();
        let outcome = EditFileTool.execute(args, &ctx).await;
        (dir, outcome)
    }

    #[tokio::test]
    async fn single_occurrence_replaces() {
        let (dir, outcome) = run(
            "let x = 1;\nlet y = 2;\n",
            json!({"file_path": "file.txt", "old_string": "let y = 2;", "new_string": "let y = 3;"}),
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "Successfully made 1 replacement(s)");
        let updated = std::fs::read_to_string(dir.path().join("file.txt")).unwrap();
        assert!(updated.contains("let y = 3;"));
    }

    #[tokio::test]
    async fn ambiguous_match_reports_count() {
        let (_dir, outcome) = run(
            "foo\nfoo\nfoo\n",
            json!({"file_path": "file.txt", "old_string": "foo", "new_string": "bar"}),
        )
        .await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Text found 3 times. Use replace_all=true or provide more context.")
        );
    }

    #[tokio::test]
    async fn replace_all_handles_every_occurrence() {
        let (dir, outcome) = run(
            "foo foo foo",
            json!({"file_path": "file.txt", "old_string": "foo", "new_string": "bar", "replace_all": true}),
        )
        .await;
        assert!(outcome.success);
        assert_eq!(outcome.metadata["replacements"], json!(3));
        let updated = std::fs::read_to_string(dir.path().join("file.txt")).unwrap();
        assert_eq!(updated, "bar bar bar");
    }

    #[tokio::test]
    async fn missing_text_shows_excerpt() {
        let long_needle = "x".repeat(80);
        let (_dir, outcome) = run(
            "short content",
            json!({"file_path": "file.txt", "old_string": long_needle, "new_string": "y"}),
        )
        .await;
        assert!(!outcome.success);
        let message = outcome.error.unwrap();
        assert!(message.starts_with("Text not found in file:"));
        assert!(message.len() < 100);
    }
}
