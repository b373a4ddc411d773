//! Regex content search across the workspace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

const DEFAULT_MAX_RESULTS: usize = 100;

const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    ".svn",
    "venv",
    ".venv",
    "dist",
    "build",
    "target",
    ".next",
    ".nuxt",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "pyc", "pyo", "so", "dll", "exe", "bin", "jpg", "jpeg", "png", "gif", "ico", "pdf", "zip",
    "tar", "gz", "rar", "7z", "mp3", "mp4", "avi", "mov", "woff", "woff2", "ttf", "eot",
];

pub struct GrepTool;

#[derive(Deserialize)]
struct GrepArgs {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    glob: Option<String>,
    #[serde(default)]
    case_insensitive: bool,
    #[serde(default)]
    context_lines: usize,
    #[serde(default)]
    max_results: Option<usize>,
}

struct Match {
    file: PathBuf,
    line_number: usize,
    line: String,
    before: Vec<String>,
    after: Vec<String>,
}

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Supports glob filtering, case-insensitive search and context lines."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "Regular expression to search for"},
                "path": {"type": "string", "description": "File or directory to search (default: workspace root)"},
                "glob": {"type": "string", "description": "Filename glob filter, e.g. '*.rs'"},
                "case_insensitive": {"type": "boolean", "description": "Case insensitive search (default: false)"},
                "context_lines": {"type": "integer", "description": "Context lines before and after each match"},
                "max_results": {"type": "integer", "description": "Maximum matches to return (default: 100)"},
            },
            "required": ["pattern"],
        })
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: GrepArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        let regex = match RegexBuilder::new(&args.pattern)
            .case_insensitive(args.case_insensitive)
            .build()
        {
            Ok(regex) => regex,
            Err(e) => return ToolOutcome::err(format!("Invalid regex pattern: {e}")),
        };
        let root = match context.resolve_path(args.path.as_deref().unwrap_or(".")) {
            Ok(root) => root,
            Err(e) => return ToolOutcome::err(e.to_string()),
        };
        if !root.exists() {
            return ToolOutcome::err(format!("Path not found: {}", root.display()));
        }
        let name_filter = match args.glob.as_deref().map(glob::Pattern::new) {
            Some(Ok(pattern)) => Some(pattern),
            Some(Err(e)) => return ToolOutcome::err(format!("Invalid glob pattern: {e}")),
            None => None,
        };
        let max_results = args.max_results.unwrap_or(DEFAULT_MAX_RESULTS);

        let mut files = Vec::new();
        if root.is_file() {
            files.push(root.clone());
        } else {
            collect_files(&root, &mut files);
        }

        let mut matches = Vec::new();
        let mut files_searched = 0usize;
        'files: for file in &files {
            if let Some(filter) = &name_filter {
                let name = file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                if !filter.matches(&name) {
                    continue;
                }
            }
            let Ok(content) = std::fs::read_to_string(file) else {
                continue;
            };
            files_searched += 1;
            let lines: Vec<&str> = content.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if !regex.is_match(line) {
                    continue;
                }
                let before = lines[i.saturating_sub(args.context_lines)..i]
                    .iter()
                    .map(|l| l.to_string())
                    .collect();
                let after = lines[(i + 1)..lines.len().min(i + 1 + args.context_lines)]
                    .iter()
                    .map(|l| l.to_string())
                    .collect();
                matches.push(Match {
                    file: file.clone(),
                    line_number: i + 1,
                    line: line.to_string(),
                    before,
                    after,
                });
                if matches.len() >= max_results {
                    break 'files;
                }
            }
        }

        if matches.is_empty() {
            return ToolOutcome::ok(format!("No matches found for '{}'", args.pattern))
                .with_metadata("match_count", json!(0));
        }

        let mut out = Vec::new();
        let mut current_file: Option<&Path> = None;
        for m in &matches {
            if current_file != Some(m.file.as_path()) {
                if current_file.is_some() {
                    out.push(String::new());
                }
                out.push(format!("--- {} ---", context.display_path(&m.file).display()));
                current_file = Some(m.file.as_path());
            }
            for (j, line) in m.before.iter().enumerate() {
                out.push(format!("  {}: {}", m.line_number - m.before.len() + j, line));
            }
            out.push(format!("> {}: {}", m.line_number, m.line));
            for (j, line) in m.after.iter().enumerate() {
                out.push(format!("  {}: {}", m.line_number + j + 1, line));
            }
        }

        let mut summary = format!(
            "\n\nFound {} matches in {} files",
            matches.len(),
            files_searched
        );
        if matches.len() >= max_results {
            summary.push_str(&format!(" (limited to {max_results})"));
        }
        ToolOutcome::ok(out.join("\n") + &summary)
            .with_metadata("match_count", json!(matches.len()))
            .with_metadata("files_searched", json!(files_searched))
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(Result::ok).collect();
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if should_skip(&path) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

fn should_skip(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    if name.starts_with('.') {
        return true;
    }
    if path.is_dir() && SKIP_DIRS.contains(&name) {
        return true;
    }
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        if BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    false
}
