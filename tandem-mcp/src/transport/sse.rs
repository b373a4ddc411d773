//! SSE transport: server-sent events inbound, HTTP POST outbound.
//!
//! Inbound messages arrive on `GET {endpoint}/sse` as `data: <json>` lines;
//! outbound messages go to `POST {endpoint}/message`. Some servers answer
//! the POST directly with JSON instead of pushing the response over the
//! event stream, so a JSON POST response is fed back as an inbound message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::{inbound_channel, Transport};
use crate::error::{McpError, McpResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    inbound_tx: mpsc::Sender<String>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SseTransport {
    /// Open the event stream and return the transport plus its inbound
    /// message channel.
    pub fn connect(
        endpoint: &str,
        headers: &HashMap<String, String>,
    ) -> McpResult<(Self, mpsc::Receiver<String>)> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::try_from(key.as_str())
                .map_err(|e| McpError::InvalidConfig(format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::InvalidConfig(format!("invalid header value for {key}: {e}")))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let (tx, rx) = inbound_channel();

        let reader = tokio::spawn(read_events(
            client.clone(),
            format!("{endpoint}/sse"),
            tx.clone(),
        ));

        Ok((
            Self {
                client,
                endpoint,
                inbound_tx: tx,
                reader: Mutex::new(Some(reader)),
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }
}

/// Consume the SSE byte stream, forwarding each `data:` payload.
async fn read_events(client: reqwest::Client, url: String, tx: mpsc::Sender<String>) {
    let response = match client.get(&url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            tracing::warn!("SSE stream returned status {}", r.status());
            return;
        }
        Err(e) => {
            tracing::warn!("failed to open SSE stream {url}: {e}");
            return;
        }
    };

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("SSE stream error: {e}");
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        // Lines may span network chunks; only consume up to the last newline.
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end();
            if let Some(data) = line.strip_prefix("data: ") {
                if !data.is_empty() && tx.send(data.to_string()).await.is_err() {
                    return;
                }
            }
        }
    }
    tracing::debug!("SSE stream ended");
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &str) -> McpResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionFailed("transport is closed".to_string()));
        }
        let response = self
            .client
            .post(format!("{}/message", self.endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(McpError::ConnectionFailed(format!(
                "message POST failed with status {}",
                response.status()
            )));
        }

        // Servers that reply synchronously short-circuit the event stream.
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        if is_json {
            let body = response.text().await?;
            if !body.trim().is_empty() {
                let _ = self.inbound_tx.send(body).await;
            }
        }
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        Ok(())
    }
}
