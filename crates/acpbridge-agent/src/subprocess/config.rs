//! Spawn configuration and command-line contract for the agent process.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use super::TransportError;
use crate::acp::{McpServer, RemoteTransport};

/// Default `--max-turns`.
pub const DEFAULT_MAX_TURNS: u32 = 200;

/// Name of the in-process tool server registered with the agent.
pub const INTERNAL_SERVER_NAME: &str = "acp";

/// One entry of the agent's `mcpServers` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerConfig {
    Http {
        url: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
    },
    Stdio {
        command: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
}

/// Map the client's server list onto the agent's config format, keyed by name.
pub fn map_mcp_servers(servers: &[McpServer]) -> BTreeMap<String, McpServerConfig> {
    servers
        .iter()
        .map(|server| match server {
            McpServer::Remote {
                transport,
                name,
                url,
                headers,
            } => {
                let headers = headers
                    .iter()
                    .map(|h| (h.name.clone(), h.value.clone()))
                    .collect();
                let config = match transport {
                    RemoteTransport::Http => McpServerConfig::Http {
                        url: url.clone(),
                        headers,
                    },
                    RemoteTransport::Sse => McpServerConfig::Sse {
                        url: url.clone(),
                        headers,
                    },
                };
                (name.clone(), config)
            }
            McpServer::Stdio {
                name,
                command,
                args,
                env,
            } => (
                name.clone(),
                McpServerConfig::Stdio {
                    command: command.clone(),
                    args: args.clone(),
                    env: env.iter().map(|e| (e.name.clone(), e.value.clone())).collect(),
                },
            ),
        })
        .collect()
}

/// Configuration for spawning one agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path to the `claude` executable.
    pub executable: PathBuf,
    /// Arguments placed before the agent flags, e.g. a script for an interpreter.
    pub program_args: Vec<String>,
    pub working_directory: PathBuf,
    pub session_id: String,
    pub max_turns: u32,
    /// Omitted from the command line when `None` or `"default"`.
    pub permission_mode: Option<String>,
    pub system_prompt: Option<String>,
    pub max_thinking_tokens: Option<u32>,
    /// Route permission checks through `control_request` on stdio.
    pub permission_prompt_stdio: bool,
    /// Built-in tools replaced by the internal tool server.
    pub disallowed_tools: Vec<String>,
    /// Client MCP servers, by name.
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Register the in-process tool server.
    pub internal_server: bool,
    /// Extra environment for the child.
    pub env: HashMap<String, String>,
}

impl SpawnConfig {
    pub fn new(executable: impl Into<PathBuf>, working_directory: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            program_args: Vec::new(),
            working_directory: working_directory.into(),
            session_id: session_id.into(),
            max_turns: DEFAULT_MAX_TURNS,
            permission_mode: None,
            system_prompt: None,
            max_thinking_tokens: None,
            permission_prompt_stdio: false,
            disallowed_tools: Vec::new(),
            mcp_servers: BTreeMap::new(),
            internal_server: false,
            env: HashMap::new(),
        }
    }

    /// Whether an `--mcp-config` file is needed.
    pub fn has_mcp_config(&self) -> bool {
        self.internal_server || !self.mcp_servers.is_empty()
    }

    /// Contents of the `--mcp-config` file.
    pub fn mcp_config_json(&self) -> Value {
        let mut servers = serde_json::Map::new();
        for (name, config) in &self.mcp_servers {
            servers.insert(name.clone(), json!(config));
        }
        if self.internal_server {
            servers.insert(
                INTERNAL_SERVER_NAME.to_string(),
                json!({ "type": "sdk", "name": INTERNAL_SERVER_NAME }),
            );
        }
        json!({ "mcpServers": servers })
    }

    /// Command-line arguments, with the config file path when one was written.
    pub fn args(&self, mcp_config_path: Option<&str>) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend([
            "--input-format=stream-json".to_string(),
            "--output-format=stream-json".to_string(),
            "--verbose".to_string(),
            "--include-partial-messages".to_string(),
            format!("--max-turns={}", self.max_turns),
            format!("--session-id={}", self.session_id),
        ]);
        if let Some(mode) = self.permission_mode.as_deref()
            && mode != "default"
        {
            args.push(format!("--permission-mode={mode}"));
        }
        if let Some(prompt) = self.system_prompt.as_deref()
            && !prompt.is_empty()
        {
            args.push(format!("--system-prompt={prompt}"));
        }
        if let Some(tokens) = self.max_thinking_tokens
            && tokens > 0
        {
            args.push(format!("--max-thinking-tokens={tokens}"));
        }
        if self.permission_prompt_stdio {
            args.push("--permission-prompt-tool=stdio".to_string());
        }
        if !self.disallowed_tools.is_empty() {
            args.push(format!("--disallowedTools={}", self.disallowed_tools.join(",")));
        }
        if let Some(path) = mcp_config_path {
            args.push(format!("--mcp-config={path}"));
        }
        args
    }

    /// Write the MCP config to a temporary file that is removed on drop.
    pub fn write_mcp_config(&self) -> Result<Option<NamedTempFile>, TransportError> {
        if !self.has_mcp_config() {
            return Ok(None);
        }
        let mut file = tempfile::Builder::new()
            .prefix("mcp-config-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| TransportError::SpawnFailed {
                reason: format!("failed to create mcp config temp file: {e}"),
            })?;
        let body = self.mcp_config_json().to_string();
        file.write_all(body.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| TransportError::SpawnFailed {
                reason: format!("failed to write mcp config: {e}"),
            })?;
        Ok(Some(file))
    }
}
