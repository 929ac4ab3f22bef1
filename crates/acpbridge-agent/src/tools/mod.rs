//! In-process tool server exposed to the agent as the `acp` MCP server.
//!
//! The agent reaches it through `mcp_message` control requests. File tools
//! are backed by the client's `fs/*` methods and shell tools by its
//! `terminal/*` methods, so a tool is only offered when the client
//! advertised the matching capability.

mod files;
mod terminal;

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use acpbridge_core::SettingsManager;
use acpbridge_core::permissions::{ACP_TOOL_PREFIX, PermissionDecision};

use crate::acp::{Client, ClientCapabilities};
use crate::subprocess::config::INTERNAL_SERVER_NAME;

pub use files::{EditError, MAX_READ_BYTES, apply_edit, is_internal_path};
pub use terminal::{BackgroundTerminals, CommandStatus, format_command_output};

/// MCP protocol version answered when the agent does not propose one.
const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Text result of one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: true,
        }
    }
}

/// One entry of `tools/list`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

fn read_def() -> ToolDefinition {
    ToolDefinition {
        name: "Read",
        description: "Read the contents of a file. Use offset and limit (in lines) to page through large files.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Absolute path of the file to read"},
                "offset": {"type": "number", "description": "Line number to start reading from (1-based)"},
                "limit": {"type": "number", "description": "Number of lines to read"}
            },
            "required": ["file_path"]
        }),
    }
}

fn write_def() -> ToolDefinition {
    ToolDefinition {
        name: "Write",
        description: "Write a file, replacing its contents.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Absolute path of the file to write"},
                "content": {"type": "string", "description": "New file contents"}
            },
            "required": ["file_path", "content"]
        }),
    }
}

fn edit_def() -> ToolDefinition {
    ToolDefinition {
        name: "Edit",
        description: "Replace text in a file. old_string must appear in the file; set replace_all to change every occurrence.",
        input_schema: json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "Absolute path of the file to modify"},
                "old_string": {"type": "string", "description": "Text to replace"},
                "new_string": {"type": "string", "description": "Replacement text"},
                "replace_all": {"type": "boolean", "default": false}
            },
            "required": ["file_path", "old_string", "new_string"]
        }),
    }
}

fn bash_defs() -> [ToolDefinition; 3] {
    [
        ToolDefinition {
            name: "Bash",
            description: "Run a shell command in the user's terminal. Long-running commands can run in the background.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "timeout": {"type": "number", "description": "Timeout in milliseconds (default 120000)"},
                    "description": {"type": "string", "description": "Short description of what the command does"},
                    "run_in_background": {"type": "boolean"}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "BashOutput",
            description: "Get output from a background command started with Bash.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "bash_id": {"type": "string"},
                    "block": {"type": "boolean", "description": "Wait for the command to finish"},
                    "timeout": {"type": "number"}
                },
                "required": ["bash_id"]
            }),
        },
        ToolDefinition {
            name: "KillShell",
            description: "Kill a background command started with Bash.",
            input_schema: json!({
                "type": "object",
                "properties": {"shell_id": {"type": "string"}},
                "required": ["shell_id"]
            }),
        },
    ]
}

/// Tools the client's capabilities can back.
pub fn tool_definitions(caps: &ClientCapabilities) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();
    if caps.fs.read_text_file {
        tools.push(read_def());
    }
    if caps.fs.write_text_file {
        tools.push(write_def());
    }
    if caps.fs.read_text_file && caps.fs.write_text_file {
        tools.push(edit_def());
    }
    if caps.terminal {
        tools.extend(bash_defs());
    }
    tools
}

/// Built-in agent tools replaced by internal ones.
pub fn disallowed_builtin_tools(caps: &ClientCapabilities) -> Vec<String> {
    tool_definitions(caps)
        .iter()
        .map(|def| def.name.to_string())
        .collect()
}

/// Serves the internal tools for one session.
pub struct ToolServer {
    client: Arc<dyn Client>,
    session_id: String,
    cwd: String,
    capabilities: ClientCapabilities,
    settings: Arc<SettingsManager>,
    terminals: BackgroundTerminals,
}

impl ToolServer {
    pub fn new(
        client: Arc<dyn Client>,
        session_id: impl Into<String>,
        capabilities: ClientCapabilities,
        settings: Arc<SettingsManager>,
    ) -> Self {
        let cwd = settings.cwd().to_string_lossy().into_owned();
        Self {
            client,
            session_id: session_id.into(),
            cwd,
            capabilities,
            settings,
            terminals: BackgroundTerminals::new(),
        }
    }

    pub fn terminals(&self) -> &BackgroundTerminals {
        &self.terminals
    }

    /// Whether any tool is offered at all.
    pub fn has_tools(&self) -> bool {
        !tool_definitions(&self.capabilities).is_empty()
    }

    /// Run a tool by its unqualified name.
    pub async fn call_tool(&self, name: &str, input: &Value) -> ToolOutput {
        let offered = tool_definitions(&self.capabilities)
            .iter()
            .any(|def| def.name == name);
        if !offered {
            return ToolOutput::error(format!("Unknown tool: {name}"));
        }
        match name {
            "Read" => self.read(input).await,
            "Write" => self.write(input).await,
            "Edit" => self.edit(input).await,
            "Bash" => self.bash(input).await,
            "BashOutput" => self.bash_output(input).await,
            "KillShell" => self.kill_shell(input).await,
            other => ToolOutput::error(format!("Unknown tool: {other}")),
        }
    }

    /// Deny rules are re-checked at call time; allow and ask were settled
    /// when the agent asked to use the tool.
    fn denied_by_rule(&self, name: &str, input: &Value) -> Option<String> {
        let qualified = format!("{ACP_TOOL_PREFIX}{name}");
        let check = self.settings.check_permission(&qualified, input);
        (check.decision == PermissionDecision::Deny).then(|| {
            let rule = check.rule.unwrap_or_default();
            info!(session_id = %self.session_id, tool = %qualified, rule = %rule, "Tool call denied by rule");
            format!("Permission to use {qualified} was denied by rule {rule}")
        })
    }

    /// Answer one JSON-RPC message from the agent. Notifications get an
    /// empty result so the control request can still be acknowledged.
    pub async fn handle_message(&self, message: &Value) -> Value {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let params = message.get("params").unwrap_or(&Value::Null);
        debug!(session_id = %self.session_id, method, "MCP message");

        let result = match method {
            "initialize" => json!({
                "protocolVersion": params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(MCP_PROTOCOL_VERSION),
                "capabilities": {"tools": {}},
                "serverInfo": {"name": INTERNAL_SERVER_NAME, "version": env!("CARGO_PKG_VERSION")}
            }),
            m if m.starts_with("notifications/") => {
                return json!({"jsonrpc": "2.0", "id": Value::Null, "result": {}});
            }
            "ping" => json!({}),
            "tools/list" => json!({"tools": tool_definitions(&self.capabilities)}),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
                let output = match self.denied_by_rule(name, &arguments) {
                    Some(reason) => ToolOutput::error(reason),
                    None => self.call_tool(name, &arguments).await,
                };
                if output.is_error {
                    debug!(session_id = %self.session_id, tool = name, "Tool returned an error");
                }
                json!({
                    "content": [{"type": "text", "text": output.text}],
                    "isError": output.is_error
                })
            }
            other => {
                warn!(session_id = %self.session_id, method = other, "Unsupported MCP method");
                return json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": -32601, "message": format!("Method not found: {other}")}
                });
            }
        };
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::acp::FileSystemCapability;

    fn caps(read: bool, write: bool, terminal: bool) -> ClientCapabilities {
        ClientCapabilities {
            fs: FileSystemCapability {
                read_text_file: read,
                write_text_file: write,
            },
            terminal,
            meta: None,
        }
    }

    #[test]
    fn tools_follow_capabilities() {
        let names = |c: &ClientCapabilities| -> Vec<&str> { tool_definitions(c).iter().map(|d| d.name).collect() };
        assert!(names(&caps(false, false, false)).is_empty());
        assert_eq!(names(&caps(true, false, false)), vec!["Read"]);
        assert_eq!(names(&caps(true, true, false)), vec!["Read", "Write", "Edit"]);
        assert_eq!(
            names(&caps(true, true, true)),
            vec!["Read", "Write", "Edit", "Bash", "BashOutput", "KillShell"]
        );
        assert_eq!(disallowed_builtin_tools(&caps(false, false, true)), vec!["Bash", "BashOutput", "KillShell"]);
    }

    #[test]
    fn definitions_serialize_input_schema() {
        let v = serde_json::to_value(read_def()).unwrap();
        assert_eq!(v["name"], "Read");
        assert_eq!(v["inputSchema"]["required"], json!(["file_path"]));
    }
}
