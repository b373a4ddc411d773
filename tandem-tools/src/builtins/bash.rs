//! Shell command execution with a destructive-command deny list.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

const MAX_TIMEOUT_SECS: u64 = 300;
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Commands that are never run, regardless of permissions.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "mkfs",
    "> /dev/sda",
    "dd if=/dev/zero",
    ":(){:|:&};:",
    "chmod -R 777 /",
    "curl | sh",
    "wget | sh",
    "curl | bash",
    "wget | bash",
];

const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    "> /dev/",
    "mkfs.",
    "dd if=",
    ":(){",
    "chmod -R 777 /",
];

pub struct BashTool;

#[derive(Deserialize)]
struct BashArgs {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[allow(dead_code)]
    #[serde(default)]
    description: Option<String>,
}

fn check_command(command: &str) -> Option<String> {
    for blocked in BLOCKED_COMMANDS {
        if command.contains(blocked) {
            return Some(format!("Blocked command pattern detected: {blocked}"));
        }
    }
    for pattern in DANGEROUS_PATTERNS {
        if command.contains(pattern) {
            return Some(format!("Dangerous pattern detected: {pattern}"));
        }
    }
    None
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory. Use for scripts, git operations, and build commands."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"},
                "timeout": {"type": "integer", "description": "Timeout in seconds (default: 30, max: 300)"},
                "description": {"type": "string", "description": "Brief description of what the command does"},
            },
            "required": ["command"],
        })
    }

    fn requires_permission(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> ToolOutcome {
        let args: BashArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        if let Some(reason) = check_command(&args.command) {
            return ToolOutcome::err(format!("Command blocked: {reason}"));
        }

        let timeout_secs = args
            .timeout
            .unwrap_or(context.timeout.as_secs())
            .min(MAX_TIMEOUT_SECS);

        let child = Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(context.workspace())
            .envs(&context.environment)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return ToolOutcome::err(format!("Error executing command: {e}")),
        };

        // On expiry the dropped future kills the child (kill_on_drop).
        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolOutcome::err(format!("Error executing command: {e}")),
            Err(_) => {
                return ToolOutcome::err(format!("Command timed out after {timeout_secs} seconds"))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = String::new();
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if text.is_empty() {
                text.push_str(&format!("[stderr]\n{stderr}"));
            } else {
                text.push_str(&format!("\n[stderr]\n{stderr}"));
            }
        }
        if text.is_empty() {
            text.push_str("(no output)");
        }
        if text.chars().count() > MAX_OUTPUT_CHARS {
            let total = text.chars().count();
            text = text.chars().take(MAX_OUTPUT_CHARS).collect();
            text.push_str(&format!("\n... (truncated, total {total} chars)"));
        }

        let code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            let mut outcome = ToolOutcome::err(format!("Command exited with code {code}"))
                .with_metadata("exit_code", json!(code));
            outcome.output = text;
            return outcome;
        }
        ToolOutcome::ok(text).with_metadata("exit_code", json!(code))
    }
}
