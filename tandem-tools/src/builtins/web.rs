//! Web tools: fetch a URL as text, and a search stub awaiting API setup.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::types::{Tool, ToolOutcome};

const MAX_CONTENT_CHARS: usize = 50_000;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct WebFetchArgs {
    url: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

/// Why a URL may not be fetched, if any.
fn url_safety_error(url: &str) -> Option<String> {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return Some("Invalid URL format".to_string());
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return Some(format!("Unsupported URL scheme: {}", parsed.scheme()));
    }
    let host = parsed.host_str().unwrap_or_default();
    if matches!(host, "localhost" | "127.0.0.1" | "0.0.0.0") {
        return Some("Cannot fetch from localhost".to_string());
    }
    if host.starts_with("192.168.") || host.starts_with("10.") || host.starts_with("172.") {
        return Some("Cannot fetch from private IP addresses".to_string());
    }
    None
}

fn html_to_text(html: &str) -> String {
    let mut text = html.to_string();
    for pattern in [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?is)<style[^>]*>.*?</style>",
    ] {
        if let Ok(re) = Regex::new(pattern) {
            text = re.replace_all(&text, "").into_owned();
        }
    }
    if let Ok(re) = Regex::new(r"(?i)<(p|div|br|h[1-6]|li|tr)[^>]*>") {
        text = re.replace_all(&text, "\n").into_owned();
    }
    if let Ok(re) = Regex::new(r"<[^>]+>") {
        text = re.replace_all(&text, "").into_owned();
    }
    for (entity, plain) in [
        ("&nbsp;", " "),
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
    ] {
        text = text.replace(entity, plain);
    }
    if let Ok(re) = Regex::new(r"\n\s*\n") {
        text = re.replace_all(&text, "\n\n").into_owned();
    }
    if let Ok(re) = Regex::new(r" +") {
        text = re.replace_all(&text, " ").into_owned();
    }
    text.trim().to_string()
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL and return the text. HTML is converted to plain text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "The URL to fetch content from"},
                "prompt": {"type": "string", "description": "What to extract or focus on from the page"},
                "timeout": {"type": "integer", "description": "Request timeout in seconds (default: 30)"},
            },
            "required": ["url"],
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolOutcome {
        let args: WebFetchArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        if let Some(reason) = url_safety_error(&args.url) {
            return ToolOutcome::err(format!("URL blocked: {reason}"));
        }
        let timeout = args.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);

        let response = match self
            .client
            .get(&args.url)
            .timeout(Duration::from_secs(timeout))
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ToolOutcome::err(format!("Request timed out after {timeout} seconds"))
            }
            Err(e) => return ToolOutcome::err(format!("Error fetching URL: {e}")),
        };
        if !response.status().is_success() {
            return ToolOutcome::err(format!("HTTP error: {}", response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return ToolOutcome::err(format!("Error fetching URL: {e}")),
        };

        let mut text = if content_type.contains("text/html") {
            html_to_text(&body)
        } else if content_type.contains("text/") || content_type.contains("application/json") {
            body
        } else {
            return ToolOutcome::err(format!("Unsupported content type: {content_type}"));
        };

        let total = text.chars().count();
        if total > MAX_CONTENT_CHARS {
            text = text.chars().take(MAX_CONTENT_CHARS).collect();
            text.push_str(&format!("\n... (truncated, total {total} chars)"));
        }

        let mut output = format!("Content from {}:\n\n{}", args.url, text);
        if let Some(prompt) = args.prompt.filter(|p| !p.is_empty()) {
            output = format!("[Query: {prompt}]\n\n{output}");
        }
        ToolOutcome::ok(output)
            .with_metadata("url", json!(args.url))
            .with_metadata("content_type", json!(content_type))
    }
}

pub struct WebSearchTool;

#[derive(Deserialize)]
struct WebSearchArgs {
    query: String,
    #[allow(dead_code)]
    #[serde(default)]
    max_results: Option<usize>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns search results with titles and snippets."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "The search query"},
                "max_results": {"type": "integer", "description": "Maximum number of results (default: 10)"},
            },
            "required": ["query"],
        })
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> ToolOutcome {
        let args: WebSearchArgs = match serde_json::from_value(arguments) {
            Ok(args) => args,
            Err(e) => return ToolOutcome::err(format!("Invalid arguments: {e}")),
        };
        // TODO: wire up a search provider; requires an API key decision.
        ToolOutcome::ok(format!(
            "Web search for: '{}'\n\nNote: Web search requires configuration of a search API. \
             Set SEARCH_API_KEY in the environment to enable this feature.",
            args.query
        ))
        .with_metadata("status", json!("not_configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_safety_checks() {
        assert!(url_safety_error("https://example.com/page").is_none());
        assert_eq!(
            url_safety_error("ftp://example.com").as_deref(),
            Some("Unsupported URL scheme: ftp")
        );
        assert_eq!(
            url_safety_error("http://localhost:8080/x").as_deref(),
            Some("Cannot fetch from localhost")
        );
        assert_eq!(
            url_safety_error("http://192.168.1.4/").as_deref(),
            Some("Cannot fetch from private IP addresses")
        );
        assert!(url_safety_error("not a url").is_some());
    }

    #[test]
    fn html_becomes_readable_text() {
        let html = r#"<html><head><style>body{color:red}</style>
            <script>alert(1)</script></head>
            <body><h1>Title</h1><p>First &amp; second</p><div>Third</div></body></html>"#;
        let text = html_to_text(html);
        assert!(text.contains("Title"));
        assert!(text.contains("First & second"));
        assert!(text.contains("Third"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color:red"));
    }

    #[tokio::test]
    async fn search_reports_unconfigured() {
        let dir = tempfile::TempDir::new().unwrap();
        let ctx = ToolContext::new(dir.path()).unwrap();
        let outcome = WebSearchTool
            .execute(json!({"query": "rust async"}), &ctx)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.metadata["status"], json!("not_configured"));
    }
}
