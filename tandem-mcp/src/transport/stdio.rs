//! Stdio transport: newline-delimited JSON over a subprocess's pipes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};

use super::{inbound_channel, Transport};
use crate::error::{McpError, McpResult};

/// How long a server process gets to exit after stdin closes before it
/// is killed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Transport speaking newline-delimited JSON with a spawned server process.
pub struct StdioTransport {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the server process and start forwarding its stdout lines.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> McpResult<(Self, mpsc::Receiver<String>)> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Spawn("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Spawn("failed to capture stdout".to_string()))?;

        let (tx, rx) = inbound_channel();
        tokio::spawn(read_lines(stdout, tx));

        Ok((
            Self {
                stdin: Mutex::new(Some(stdin)),
                child: Mutex::new(Some(child)),
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }
}

async fn read_lines(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!("server stdout reached EOF");
                break;
            }
            Err(e) => {
                tracing::warn!("error reading server stdout: {e}");
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &str) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionFailed("transport is closed".to_string()));
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| McpError::ConnectionFailed("stdin is closed".to_string()))?;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Closing stdin asks a well-behaved server to exit on its own.
        self.stdin.lock().await.take();

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!("server process exited: {status}");
                }
                Ok(Err(e)) => {
                    tracing::warn!("error waiting for server process: {e}");
                }
                Err(_) => {
                    tracing::warn!("server process did not exit within grace period, killing");
                    let _ = child.kill().await;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_round_trip() {
        let (transport, mut inbound) =
            StdioTransport::spawn("cat", &[], &HashMap::new()).await.unwrap();

        transport.send(r#"{"hello":"world"}"#).await.unwrap();
        let line = inbound.recv().await.unwrap();
        assert_eq!(line, r#"{"hello":"world"}"#);

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, _inbound) =
            StdioTransport::spawn("cat", &[], &HashMap::new()).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(transport.send("late").await.is_err());
    }

    #[tokio::test]
    async fn inbound_closes_when_process_exits() {
        let (transport, mut inbound) =
            StdioTransport::spawn("true", &[], &HashMap::new()).await.unwrap();
        assert!(inbound.recv().await.is_none());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn env_is_passed_to_child() {
        let mut env = HashMap::new();
        env.insert("TANDEM_TEST_VAR".to_string(), "marker".to_string());
        let (transport, mut inbound) = StdioTransport::spawn(
            "printenv",
            &["TANDEM_TEST_VAR".to_string()],
            &env,
        )
        .await
        .unwrap();
        assert_eq!(inbound.recv().await.unwrap(), "marker");
        transport.close().await.unwrap();
    }
}
