//! Filename pattern matching, newest files first.

use std::time::SystemTime;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

const MAX_RESULTS: usize = 100;

pub struct GlobTool;

#[derive(Deserialize)]
struct GlobArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern (e.g. '**/*.rs'). Results are sorted by modification time, newest first."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Glob pattern to match"},
                "path": {"type": "string", "description": "Directory to search from (default: workspace root)"},
            },
            "required": ["pattern"],
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: GlobArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let base = match context.resolve_path(args.path.as_deref().unwrap_or(".")) {
            Ok(base) => base,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };

        let full_pattern = base.join(&args.pattern);
        let paths = match glob::glob(&full_pattern.to_string_lossy()) {
            Ok(paths) => paths,
            Err(e) => return ToolOutcome::err(format!("Invalid glob pattern: {e}")),
        };

        let mut matches: Vec<(std::path::PathBuf, SystemTime)> = paths
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .map(|p| {
                let mtime = p
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (p, mtime)
            })
            .collect();

        if matches.is_empty() {
            return ToolOutcome::ok(format!("No files matched pattern '{}'", args.pattern));
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));
        let total = matches.len();

        let mut lines: Vec<String> = matches
            .iter()
            .take(MAX_RESULTS)
            .map(|(p, _)| context.display_path(p).display().to_string())
            .collect();
        if total > MAX_RESULTS {
            lines.push(format!("... and {} more", total - MAX_RESULTS));
        }
        ToolOutcome::ok(lines.join("\n")).with_metadata("match_count", json!(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn matches_recursively() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/inner")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/inner/b.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/c.txt"), "").unwrap();

        let ctx = ToolContext::new(dir.path()).unwrap();
        let outcome = GlobTool.execute(json!({"pattern": "**/*.rs"}), &ctx).await;
        assert!(outcome.success);
        assert_eq!(outcome.metadata["match_count"], json!(2));
        assert!(outcome.output.contains("a.rs"));
        assert!(outcome.output.contains("b.rs"));
        assert!(!outcome.output.contains("c.txt"));
    }

    #[tokio::test]
    async fn no_matches_is_a_success_with_note() {
        let dir = TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path()).unwrap();
        let outcome = GlobTool.execute(json!({"pattern": "*.zig"}), &ctx).await;
        assert!(outcome.success);
        assert_eq!(outcome.output, "No files matched pattern '*.zig'");
    }
}
