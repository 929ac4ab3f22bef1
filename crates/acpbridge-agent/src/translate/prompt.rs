//! ACP prompt blocks → agent user message content.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::acp::{ContentBlock, EmbeddedResource};

static MCP_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/mcp:([^:\s]+):(\S+)(\s+.*)?$").expect("static regex is valid")
});

/// Rewrite `/mcp:server:command args` into the agent's `/server:command (MCP) args`.
pub fn normalize_mcp_slash_command(text: &str) -> String {
    match MCP_COMMAND.captures(text) {
        Some(caps) => format!(
            "/{}:{} (MCP){}",
            &caps[1],
            &caps[2],
            caps.get(3).map_or("", |m| m.as_str())
        ),
        None => text.to_string(),
    }
}

/// Render a URI as a mention link when it names a file.
pub fn format_uri_as_link(uri: &str) -> String {
    let rest = uri
        .strip_prefix("file://")
        .or_else(|| uri.strip_prefix("zed://"));
    match rest {
        Some(path) => {
            let name = path.rsplit('/').next().filter(|n| !n.is_empty()).unwrap_or(path);
            format!("[@{name}]({uri})")
        }
        None => uri.to_string(),
    }
}

fn text(text: impl Into<String>) -> Value {
    json!({ "type": "text", "text": text.into() })
}

/// Convert a prompt into user message content blocks.
///
/// Embedded text resources are referenced inline and their contents are
/// appended as `<context>` blocks after everything else.
pub fn prompt_to_content(prompt: &[ContentBlock]) -> Vec<Value> {
    let mut content = Vec::with_capacity(prompt.len());
    let mut context = Vec::new();

    for block in prompt {
        match block {
            ContentBlock::Text { text: t } => content.push(text(normalize_mcp_slash_command(t))),
            ContentBlock::ResourceLink { uri, .. } => content.push(text(format_uri_as_link(uri))),
            ContentBlock::Resource {
                resource: EmbeddedResource::Text { uri, text: body, .. },
            } => {
                content.push(text(format_uri_as_link(uri)));
                context.push(text(format!("\n<context ref=\"{uri}\">\n{body}\n</context>")));
            }
            ContentBlock::Image { data, mime_type, uri } => {
                if !data.is_empty() {
                    content.push(json!({
                        "type": "image",
                        "source": { "type": "base64", "data": data, "media_type": mime_type }
                    }));
                } else if let Some(uri) = uri.as_deref()
                    && uri.starts_with("http")
                {
                    content.push(json!({
                        "type": "image",
                        "source": { "type": "url", "url": uri }
                    }));
                }
            }
            ContentBlock::Resource {
                resource: EmbeddedResource::Blob { .. },
            }
            | ContentBlock::Audio { .. } => {}
        }
    }

    content.extend(context);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_commands_are_normalized() {
        assert_eq!(normalize_mcp_slash_command("/mcp:github:list-prs"), "/github:list-prs (MCP)");
        assert_eq!(
            normalize_mcp_slash_command("/mcp:github:list-prs open mine"),
            "/github:list-prs (MCP) open mine"
        );
        assert_eq!(normalize_mcp_slash_command("/compact"), "/compact");
        assert_eq!(normalize_mcp_slash_command("hello /mcp:a:b"), "hello /mcp:a:b");
    }

    #[test]
    fn uris_become_links() {
        assert_eq!(format_uri_as_link("file:///home/u/src/main.rs"), "[@main.rs](file:///home/u/src/main.rs)");
        assert_eq!(format_uri_as_link("zed:///agent/thread"), "[@thread](zed:///agent/thread)");
        assert_eq!(format_uri_as_link("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn resources_add_trailing_context() {
        let prompt = vec![
            ContentBlock::text("Explain"),
            ContentBlock::Resource {
                resource: EmbeddedResource::Text {
                    uri: "file:///p/lib.rs".into(),
                    text: "pub fn f() {}".into(),
                    mime_type: None,
                },
            },
            ContentBlock::ResourceLink {
                uri: "file:///p/README.md".into(),
                name: "README.md".into(),
                mime_type: None,
            },
        ];
        let content = prompt_to_content(&prompt);
        let texts: Vec<&str> = content.iter().map(|c| c["text"].as_str().unwrap_or("")).collect();
        assert_eq!(
            texts,
            vec![
                "Explain",
                "[@lib.rs](file:///p/lib.rs)",
                "[@README.md](file:///p/README.md)",
                "\n<context ref=\"file:///p/lib.rs\">\npub fn f() {}\n</context>",
            ]
        );
    }

    #[test]
    fn images_by_data_or_url() {
        let prompt = vec![
            ContentBlock::image("AAAA", "image/png"),
            ContentBlock::Image {
                data: String::new(),
                mime_type: "image/jpeg".into(),
                uri: Some("https://img/x.jpg".into()),
            },
            ContentBlock::Image {
                data: String::new(),
                mime_type: "image/jpeg".into(),
                uri: Some("file:///x.jpg".into()),
            },
        ];
        let content = prompt_to_content(&prompt);
        assert_eq!(content.len(), 2);
        assert_eq!(
            content[0],
            json!({"type": "image", "source": {"type": "base64", "data": "AAAA", "media_type": "image/png"}})
        );
        assert_eq!(content[1], json!({"type": "image", "source": {"type": "url", "url": "https://img/x.jpg"}}));
    }
}
