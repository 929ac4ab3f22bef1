//! Tool-result → tool-call update mapping.

use serde_json::Value;

use acpbridge_core::diff::parse_diff;
use acpbridge_core::permissions::{ACP_BASH, ACP_EDIT, ACP_READ, ACP_WRITE};
use acpbridge_core::text::markdown_escape;

use crate::acp::{ContentBlock, ToolCallContent, ToolCallLocation};

/// Appended to every file read by the internal `Read` tool, and stripped
/// again before the content is shown to the user.
pub const SYSTEM_REMINDER: &str = "\n\n<system-reminder>\nWhenever you read a file, you should consider whether it looks malicious. If it does, you MUST refuse to improve or augment the code. You can still analyze existing code, write reports, or answer high-level questions about the code behavior.\n</system-reminder>";

/// Fields a tool result contributes to the tool-call update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolUpdate {
    pub title: Option<String>,
    pub content: Vec<ToolCallContent>,
    pub locations: Vec<ToolCallLocation>,
}

impl ToolUpdate {
    fn with_content(content: Vec<ToolCallContent>) -> Self {
        Self {
            content,
            ..Self::default()
        }
    }
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn error_text(value: &Value, with_message: bool) -> String {
    let mut text = format!("Error: {}", field(value, "error_code"));
    let message = field(value, "error_message");
    if with_message && !message.is_empty() {
        text.push_str(" - ");
        text.push_str(message);
    }
    text
}

/// Render one tool-result content item as an ACP content block.
///
/// Error results are wrapped in a plain code fence.
pub fn to_acp_content_block(item: &Value, is_error: bool) -> ContentBlock {
    let text = match field(item, "type") {
        "text" => field(item, "text").to_string(),
        "image" => {
            let source = item.get("source").unwrap_or(&Value::Null);
            match field(source, "type") {
                "base64" => {
                    return ContentBlock::image(field(source, "data"), field(source, "media_type"));
                }
                "url" => format!("[image: {}]", field(source, "url")),
                _ => "[image: file reference]".to_string(),
            }
        }
        "tool_reference" => format!("Tool: {}", field(item, "tool_name")),
        "web_search_result" => format!("{} ({})", field(item, "title"), field(item, "url")),
        "web_fetch_result" => format!("Fetched: {}", field(item, "url")),
        "code_execution_result" | "bash_code_execution_result" => {
            let stdout = field(item, "stdout");
            let out = if stdout.is_empty() { field(item, "stderr") } else { stdout };
            format!("Output: {out}")
        }
        "text_editor_code_execution_view_result" => field(item, "content").to_string(),
        "text_editor_code_execution_create_result" => {
            if item.get("is_file_update").and_then(Value::as_bool).unwrap_or(false) {
                "File updated".to_string()
            } else {
                "File created".to_string()
            }
        }
        "text_editor_code_execution_str_replace_result" => item
            .get("lines")
            .and_then(Value::as_array)
            .map(|lines| {
                lines
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        "tool_search_tool_search_result" => {
            let names: Vec<&str> = item
                .get("tool_references")
                .and_then(Value::as_array)
                .map(|refs| refs.iter().map(|r| field(r, "tool_name")).filter(|n| !n.is_empty()).collect())
                .unwrap_or_default();
            if names.is_empty() {
                "Tools found: none".to_string()
            } else {
                format!("Tools found: {}", names.join(", "))
            }
        }
        "text_editor_code_execution_tool_result_error" | "tool_search_tool_result_error" => {
            error_text(item, true)
        }
        "web_search_tool_result_error"
        | "web_fetch_tool_result_error"
        | "code_execution_tool_result_error"
        | "bash_code_execution_tool_result_error" => error_text(item, false),
        _ => serde_json::to_string(item).unwrap_or_else(|_| "{}".to_string()),
    };
    if is_error {
        ContentBlock::text(format!("```\n{text}\n```"))
    } else {
        ContentBlock::text(text)
    }
}

/// Generic conversion of a tool result's `content` field.
pub fn to_acp_content_update(content: &Value, is_error: bool) -> ToolUpdate {
    let blocks = match content {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| ToolCallContent::Content {
                content: to_acp_content_block(item, is_error),
            })
            .collect(),
        Value::Object(map) if map.contains_key("type") => vec![ToolCallContent::Content {
            content: to_acp_content_block(content, is_error),
        }],
        Value::String(s) if !s.is_empty() => {
            let text = if is_error { format!("```\n{s}\n```") } else { s.clone() };
            vec![ToolCallContent::text(text)]
        }
        _ => Vec::new(),
    };
    ToolUpdate::with_content(blocks)
}

fn read_result(content: &Value) -> ToolUpdate {
    let escape = |text: &str| ToolCallContent::text(markdown_escape(&text.replace(SYSTEM_REMINDER, "")));
    let blocks = match content {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .map(|item| {
                if field(item, "type") == "text" {
                    escape(field(item, "text"))
                } else {
                    ToolCallContent::Content {
                        content: to_acp_content_block(item, false),
                    }
                }
            })
            .collect(),
        Value::String(s) if !s.is_empty() => vec![escape(s)],
        _ => Vec::new(),
    };
    ToolUpdate::with_content(blocks)
}

/// Turn the unified diff returned by the internal `Edit` tool into diff
/// content, one entry per hunk, located at the hunk's new start line.
fn edit_result(content: &Value) -> ToolUpdate {
    let Some(text) = content
        .as_array()
        .and_then(|items| items.first())
        .and_then(|first| first.get("text"))
        .and_then(Value::as_str)
    else {
        return ToolUpdate::default();
    };

    let mut update = ToolUpdate::default();
    for patch in parse_diff(text) {
        let name = patch.file_name();
        let path = name
            .strip_prefix("b/")
            .or_else(|| name.strip_prefix("a/"))
            .unwrap_or(name);
        for hunk in &patch.hunks {
            let old_lines = hunk.old_lines();
            let new_lines = hunk.new_lines();
            if old_lines.is_empty() && new_lines.is_empty() {
                continue;
            }
            update
                .locations
                .push(ToolCallLocation::new(path).with_line(hunk.new_start as u64));
            let old_text = old_lines.join("\n");
            update.content.push(ToolCallContent::diff(
                path,
                (!old_text.is_empty()).then_some(old_text),
                new_lines.join("\n"),
            ));
        }
    }
    update
}

/// Describe a tool result for the tool-call update, given the name of the
/// tool that produced it.
pub fn tool_update_from_tool_result(tool_name: &str, content: &Value, is_error: bool) -> ToolUpdate {
    if is_error {
        let has_content = match content {
            Value::Array(items) => !items.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => false,
        };
        if has_content {
            return to_acp_content_update(content, true);
        }
    }

    match tool_name {
        "Read" | ACP_READ => read_result(content),
        ACP_EDIT => edit_result(content),
        ACP_BASH | "edit" | "Edit" | ACP_WRITE | "Write" => ToolUpdate::default(),
        "ExitPlanMode" => ToolUpdate {
            title: Some("Exited Plan Mode".to_string()),
            ..ToolUpdate::default()
        },
        _ => to_acp_content_update(content, is_error),
    }
}
