//! Tool-use → tool-call start mapping.

use serde_json::Value;

use acpbridge_core::permissions::{ACP_BASH, ACP_BASH_OUTPUT, ACP_EDIT, ACP_KILL_SHELL, ACP_READ, ACP_WRITE};

use crate::acp::{ToolCallContent, ToolCallLocation, ToolKind};

/// Uniform description of a tool call at the moment it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInfo {
    pub title: String,
    pub kind: ToolKind,
    pub content: Vec<ToolCallContent>,
    pub locations: Vec<ToolCallLocation>,
}

impl ToolInfo {
    fn new(title: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            title: title.into(),
            kind,
            content: Vec::new(),
            locations: Vec::new(),
        }
    }

    fn with_text(mut self, text: &str) -> Self {
        if !text.is_empty() {
            self.content.push(ToolCallContent::text(text));
        }
        self
    }

    fn with_location(mut self, path: &str) -> Self {
        if !path.is_empty() {
            self.locations.push(ToolCallLocation::new(path));
        }
        self
    }
}

pub(crate) fn input_str<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn input_u64(input: &Value, key: &str) -> Option<u64> {
    input.get(key).and_then(|v| {
        v.as_u64()
            .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
    })
}

pub(crate) fn input_bool(input: &Value, key: &str) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn input_str_list<'a>(input: &'a Value, key: &str) -> Vec<&'a str> {
    input
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Line-range suffix for read titles, 1-based and inclusive.
fn read_range(input: &Value) -> String {
    let offset = input_u64(input, "offset");
    match input_u64(input, "limit") {
        Some(limit) if limit > 0 => {
            let start = offset.map_or(1, |o| o.saturating_add(1));
            format!(" ({start} - {})", start.saturating_add(limit - 1))
        }
        _ => match offset {
            Some(o) if o > 0 => format!(" (from line {})", o.saturating_add(1)),
            _ => String::new(),
        },
    }
}

fn read_location(input: &Value) -> Vec<ToolCallLocation> {
    let path = input_str(input, "file_path");
    if path.is_empty() {
        return Vec::new();
    }
    let line = input_u64(input, "offset").unwrap_or(0);
    vec![ToolCallLocation::new(path).with_line(line)]
}

fn grep_title(input: &Value) -> String {
    let mut label = String::from("grep");
    if input_bool(input, "-i") {
        label.push_str(" -i");
    }
    if input_bool(input, "-n") {
        label.push_str(" -n");
    }
    for flag in ["-A", "-B", "-C"] {
        if let Some(n) = input_u64(input, flag) {
            label.push_str(&format!(" {flag} {n}"));
        }
    }
    match input_str(input, "output_mode") {
        "FilesWithMatches" => label.push_str(" -l"),
        "Count" => label.push_str(" -c"),
        _ => {}
    }
    if let Some(n) = input_u64(input, "head_limit") {
        label.push_str(&format!(" | head -{n}"));
    }
    let glob = input_str(input, "glob");
    if !glob.is_empty() {
        label.push_str(&format!(" --include=\"{glob}\""));
    }
    let file_type = input_str(input, "type");
    if !file_type.is_empty() {
        label.push_str(&format!(" --type={file_type}"));
    }
    if input_bool(input, "multiline") {
        label.push_str(" -P");
    }
    let pattern = input_str(input, "pattern");
    if !pattern.is_empty() {
        label.push_str(&format!(" \"{pattern}\""));
    }
    let path = input_str(input, "path");
    if !path.is_empty() {
        label.push(' ');
        label.push_str(path);
    }
    label
}

fn web_search_title(input: &Value) -> String {
    let mut label = format!("\"{}\"", input_str(input, "query"));
    let allowed = input_str_list(input, "allowed_domains");
    if !allowed.is_empty() {
        label.push_str(&format!(" (allowed: {})", allowed.join(", ")));
    }
    let blocked = input_str_list(input, "blocked_domains");
    if !blocked.is_empty() {
        label.push_str(&format!(" (blocked: {})", blocked.join(", ")));
    }
    label
}

fn todo_title(input: &Value) -> String {
    let items: Vec<&str> = input
        .get("todos")
        .and_then(Value::as_array)
        .map(|todos| {
            todos
                .iter()
                .map(|t| input_str(t, "content"))
                .filter(|c| !c.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if items.is_empty() {
        "Update TODOs".to_string()
    } else {
        format!("Update TODOs: {}", items.join(", "))
    }
}

fn fallback(name: &str, input: &Value) -> ToolInfo {
    let title = if name.is_empty() { "Unknown Tool" } else { name };
    let mut info = ToolInfo::new(title, ToolKind::Other);
    if !input.is_null() {
        let pretty = serde_json::to_string_pretty(input).unwrap_or_else(|_| "{}".to_string());
        info.content.push(ToolCallContent::text(format!("```json\n{pretty}\n```")));
    }
    info
}

/// Describe a tool invocation by name and input arguments.
pub fn tool_info_from_tool_use(name: &str, input: &Value) -> ToolInfo {
    match name {
        "Task" => {
            let description = input_str(input, "description");
            let title = if description.is_empty() { "Task" } else { description };
            ToolInfo::new(title, ToolKind::Think).with_text(input_str(input, "prompt"))
        }
        "NotebookRead" => {
            let path = input_str(input, "notebook_path");
            let title = if path.is_empty() {
                "Read Notebook".to_string()
            } else {
                format!("Read Notebook {path}")
            };
            ToolInfo::new(title, ToolKind::Read).with_location(path)
        }
        "NotebookEdit" => {
            let path = input_str(input, "notebook_path");
            let title = if path.is_empty() {
                "Edit Notebook".to_string()
            } else {
                format!("Edit Notebook {path}")
            };
            ToolInfo::new(title, ToolKind::Edit)
                .with_text(input_str(input, "new_source"))
                .with_location(path)
        }
        "Bash" | ACP_BASH => {
            let command = input_str(input, "command");
            let title = if command.is_empty() {
                "Terminal".to_string()
            } else {
                format!("`{}`", command.replace('`', "\\`"))
            };
            ToolInfo::new(title, ToolKind::Execute).with_text(input_str(input, "description"))
        }
        "BashOutput" | ACP_BASH_OUTPUT => ToolInfo::new("Tail Logs", ToolKind::Execute),
        "KillShell" | ACP_KILL_SHELL => ToolInfo::new("Kill Process", ToolKind::Execute),
        ACP_READ => {
            let path = input_str(input, "file_path");
            let target = if path.is_empty() { "File" } else { path };
            let mut info = ToolInfo::new(format!("Read {target}{}", read_range(input)), ToolKind::Read);
            info.locations = read_location(input);
            info
        }
        "Read" => {
            let mut info = ToolInfo::new("Read File", ToolKind::Read);
            info.locations = read_location(input);
            info
        }
        "LS" => {
            let path = input_str(input, "path");
            let target = if path.is_empty() {
                "current".to_string()
            } else {
                format!("`{path}`")
            };
            ToolInfo::new(format!("List the {target} directory's contents"), ToolKind::Search)
        }
        "Edit" | ACP_EDIT => {
            let path = input_str(input, "file_path");
            if path.is_empty() {
                return ToolInfo::new("Edit", ToolKind::Edit);
            }
            let old_text = input
                .get("old_string")
                .map(|_| input_str(input, "old_string").to_string());
            let mut info = ToolInfo::new(format!("Edit `{path}`"), ToolKind::Edit).with_location(path);
            info.content.push(ToolCallContent::diff(
                path,
                old_text,
                input_str(input, "new_string"),
            ));
            info
        }
        "Write" | ACP_WRITE => {
            let path = input_str(input, "file_path");
            let content = input_str(input, "content");
            if path.is_empty() {
                let info = ToolInfo::new("Write", ToolKind::Edit);
                return if name == ACP_WRITE { info.with_text(content) } else { info };
            }
            let mut info = ToolInfo::new(format!("Write {path}"), ToolKind::Edit).with_location(path);
            info.content.push(ToolCallContent::diff(path, None, content));
            info
        }
        "Glob" => {
            let path = input_str(input, "path");
            let pattern = input_str(input, "pattern");
            let mut title = String::from("Find");
            if !path.is_empty() {
                title.push_str(&format!(" `{path}`"));
            }
            if !pattern.is_empty() {
                title.push_str(&format!(" `{pattern}`"));
            }
            ToolInfo::new(title, ToolKind::Search).with_location(path)
        }
        "Grep" => ToolInfo::new(grep_title(input), ToolKind::Search),
        "WebFetch" => {
            let url = input_str(input, "url");
            let title = if url.is_empty() {
                "Fetch".to_string()
            } else {
                format!("Fetch {url}")
            };
            ToolInfo::new(title, ToolKind::Fetch).with_text(input_str(input, "prompt"))
        }
        "WebSearch" => ToolInfo::new(web_search_title(input), ToolKind::Fetch),
        "TodoWrite" => ToolInfo::new(todo_title(input), ToolKind::Think),
        "ExitPlanMode" => {
            ToolInfo::new("Ready to code?", ToolKind::SwitchMode).with_text(input_str(input, "plan"))
        }
        _ => fallback(name, input),
    }
}
