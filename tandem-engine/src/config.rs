//! TOML configuration for the engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tandem_mcp::TransportConfig;

use crate::error::{EngineError, EngineResult};

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Workspace root for tool execution. Defaults to the current
    /// directory when unset.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Where session logs are written. Defaults to `.tandem/sessions`
    /// under the workspace.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Tools pre-approved for every session.
    #[serde(default)]
    pub always_allow: Vec<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            workspace: None,
            session_dir: None,
            system_prompt: None,
            always_allow: Vec::new(),
            providers: HashMap::new(),
            mcp_servers: HashMap::new(),
        }
    }
}

impl Config {
    pub async fn load(path: &Path) -> EngineResult<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(toml::from_str(&text)?)
    }

    pub fn session_dir(&self, workspace: &Path) -> PathBuf {
        self.session_dir
            .clone()
            .unwrap_or_else(|| workspace.join(".tandem").join("sessions"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Override for the provider's base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Default model for this provider.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// One MCP server entry. Stdio servers set `command`; SSE servers set
/// `endpoint`. Exactly one of the two must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    pub fn transport(&self, name: &str) -> EngineResult<TransportConfig> {
        match (&self.command, &self.endpoint) {
            (Some(command), None) => Ok(TransportConfig::Stdio {
                command: command.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
            }),
            (None, Some(endpoint)) => Ok(TransportConfig::Sse {
                endpoint: endpoint.clone(),
                headers: self.headers.clone(),
            }),
            (Some(_), Some(_)) => Err(EngineError::Config(format!(
                "MCP server '{name}' sets both command and endpoint"
            ))),
            (None, None) => Err(EngineError::Config(format!(
                "MCP server '{name}' sets neither command nor endpoint"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let text = r#"
            provider = "anthropic"
            model = "claude-sonnet-4-20250514"
            workspace = "/tmp/work"
            always_allow = ["bash"]

            [providers.anthropic]
            api_key_env = "ANTHROPIC_API_KEY"

            [mcp_servers.github]
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-github"]

            [mcp_servers.github.env]
            GITHUB_TOKEN = "x"

            [mcp_servers.remote]
            endpoint = "http://localhost:3001"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.always_allow, vec!["bash"]);
        assert_eq!(config.mcp_servers.len(), 2);

        let github = config.mcp_servers["github"].transport("github").unwrap();
        assert!(matches!(github, TransportConfig::Stdio { .. }));
        let remote = config.mcp_servers["remote"].transport("remote").unwrap();
        assert!(matches!(remote, TransportConfig::Sse { .. }));
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.provider, "anthropic");
        assert!(config.mcp_servers.is_empty());
        assert_eq!(
            config.session_dir(Path::new("/work")),
            PathBuf::from("/work/.tandem/sessions")
        );
    }

    #[test]
    fn ambiguous_server_entries_are_rejected() {
        let neither = McpServerConfig::default();
        assert!(matches!(
            neither.transport("a"),
            Err(EngineError::Config(_))
        ));

        let both = McpServerConfig {
            command: Some("cat".to_string()),
            endpoint: Some("http://localhost".to_string()),
            ..Default::default()
        };
        assert!(matches!(both.transport("b"), Err(EngineError::Config(_))));
    }
}
