//! NDJSON parser for the Claude Code protocol.
//!
//! Tolerant reader: unknown fields are ignored and unknown `type` values
//! become [`Message::Unknown`]. Only a line that is not JSON, or has no
//! `type`, is an error.

use serde_json::Value;

use super::types::*;
use crate::error::{Error, Result};

/// Block types that are recognised but never rendered.
const IGNORED_BLOCKS: &[&str] = &[
    "document",
    "search_result",
    "redacted_thinking",
    "input_json_delta",
    "citations_delta",
    "signature_delta",
    "container_upload",
    "compaction",
    "compaction_delta",
];

/// Block types carrying the outcome of a tool invocation.
const TOOL_RESULT_BLOCKS: &[&str] = &[
    "tool_result",
    "tool_search_tool_result",
    "web_fetch_tool_result",
    "web_search_tool_result",
    "code_execution_tool_result",
    "bash_code_execution_tool_result",
    "text_editor_code_execution_tool_result",
    "mcp_tool_result",
];

/// Line types that are read and dropped.
const HOUSEKEEPING: &[&str] = &[
    "tool_progress",
    "tool_use_summary",
    "auth_status",
    "keep_alive",
    "control_response",
    "control_cancel_request",
];

/// Parse one NDJSON line, keeping the original text.
pub fn parse_line(line: &str) -> Result<Envelope> {
    let raw: Value = serde_json::from_str(line)?;
    Ok(Envelope {
        message: parse_value(&raw)?,
        raw: line.to_string(),
    })
}

fn str_field<'a>(raw: &'a Value, key: &str) -> &'a str {
    raw.get(key).and_then(Value::as_str).unwrap_or("")
}

fn opt_str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(String::from)
}

/// Parse a JSON value into a canonical message.
pub fn parse_value(raw: &Value) -> Result<Message> {
    let msg_type = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::NdjsonParse("Missing 'type' field".into()))?;

    let message = match msg_type {
        "system" => Message::System(SystemMessage {
            subtype: str_field(raw, "subtype").to_string(),
            session_id: str_field(raw, "session_id").to_string(),
            model: str_field(raw, "model").to_string(),
        }),
        "assistant" => Message::Assistant(parse_chat(raw, "assistant")),
        "user" => Message::User(parse_chat(raw, "user")),
        "stream_event" => Message::StreamEvent(parse_stream_event(raw)),
        "control_request" => Message::ControlRequest(parse_control_request(raw)),
        "result" => Message::Result(parse_result(raw)),
        t if HOUSEKEEPING.contains(&t) => Message::Housekeeping {
            msg_type: t.to_string(),
        },
        _ => Message::Unknown {
            msg_type: msg_type.to_string(),
            payload: raw.clone(),
        },
    };
    Ok(message)
}

fn parse_chat(raw: &Value, default_role: &str) -> ChatMessage {
    let msg = raw.get("message").unwrap_or(&Value::Null);
    let role = msg
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or(default_role)
        .to_string();
    let content = match msg.get("content") {
        Some(Value::String(s)) => MessageContent::Text(s.clone()),
        Some(Value::Array(items)) => MessageContent::Blocks(items.iter().map(parse_block).collect()),
        _ => MessageContent::Blocks(Vec::new()),
    };
    ChatMessage {
        role,
        content,
        parent_tool_use_id: opt_str_field(raw, "parent_tool_use_id"),
    }
}

fn parse_image_source(source: Option<&Value>) -> ImageSource {
    let Some(source) = source else {
        return ImageSource::Other(Value::Null);
    };
    match str_field(source, "type") {
        "base64" => ImageSource::Base64 {
            data: str_field(source, "data").to_string(),
            media_type: str_field(source, "media_type").to_string(),
        },
        "url" => ImageSource::Url {
            url: str_field(source, "url").to_string(),
        },
        _ => ImageSource::Other(source.clone()),
    }
}

/// Decode one content block or delta by its `type` discriminant.
pub fn parse_block(block: &Value) -> ContentBlock {
    let block_type = str_field(block, "type");
    match block_type {
        "text" | "text_delta" => ContentBlock::Text {
            text: str_field(block, "text").to_string(),
        },
        "thinking" | "thinking_delta" => ContentBlock::Thinking {
            thinking: str_field(block, "thinking").to_string(),
        },
        "image" => ContentBlock::Image {
            source: parse_image_source(block.get("source")),
        },
        "tool_use" | "server_tool_use" | "mcp_tool_use" => ContentBlock::ToolUse {
            kind: match block_type {
                "server_tool_use" => ToolUseKind::ServerToolUse,
                "mcp_tool_use" => ToolUseKind::McpToolUse,
                _ => ToolUseKind::ToolUse,
            },
            id: str_field(block, "id").to_string(),
            name: str_field(block, "name").to_string(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        },
        t if TOOL_RESULT_BLOCKS.contains(&t) => ContentBlock::ToolResult {
            block_type: t.to_string(),
            tool_use_id: str_field(block, "tool_use_id").to_string(),
            content: block.get("content").cloned().unwrap_or(Value::Null),
            is_error: block
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        t if IGNORED_BLOCKS.contains(&t) => ContentBlock::Ignored {
            block_type: t.to_string(),
        },
        _ => ContentBlock::Other(block.clone()),
    }
}

fn parse_stream_event(raw: &Value) -> StreamEvent {
    let event = raw.get("event").unwrap_or(&Value::Null);
    let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
    let kind = match str_field(event, "type") {
        "content_block_start" => match event.get("content_block") {
            Some(block) => StreamEventKind::ContentBlockStart {
                index,
                block: parse_block(block),
            },
            None => StreamEventKind::Unknown(event.clone()),
        },
        "content_block_delta" => match event.get("delta") {
            Some(delta) => StreamEventKind::ContentBlockDelta {
                index,
                delta: parse_block(delta),
            },
            None => StreamEventKind::Unknown(event.clone()),
        },
        "content_block_stop" => StreamEventKind::ContentBlockStop { index },
        "message_start" => StreamEventKind::MessageStart,
        "message_delta" => StreamEventKind::MessageDelta,
        "message_stop" => StreamEventKind::MessageStop,
        _ => StreamEventKind::Unknown(event.clone()),
    };
    StreamEvent {
        event: kind,
        parent_tool_use_id: opt_str_field(raw, "parent_tool_use_id"),
    }
}

fn parse_control_request(raw: &Value) -> ControlRequest {
    let request_id = str_field(raw, "request_id").to_string();
    let request = raw.get("request").cloned().unwrap_or(Value::Null);
    let kind = match str_field(&request, "subtype") {
        "can_use_tool" => ControlRequestKind::CanUseTool {
            tool_name: str_field(&request, "tool_name").to_string(),
            input: request.get("input").cloned().unwrap_or(Value::Null),
            tool_use_id: opt_str_field(&request, "tool_use_id"),
        },
        "mcp_message" => ControlRequestKind::McpMessage {
            server_name: str_field(&request, "server_name").to_string(),
            message: request.get("message").cloned().unwrap_or(Value::Null),
        },
        other => ControlRequestKind::Unknown {
            subtype: other.to_string(),
            payload: request.clone(),
        },
    };
    ControlRequest {
        request_id,
        request: kind,
    }
}

fn parse_result(raw: &Value) -> ResultMessage {
    let errors = raw
        .get("errors")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let error = raw.get("error").and_then(|e| {
        let message = e.get("message").and_then(Value::as_str)?;
        Some(AgentError {
            message: message.to_string(),
            code: opt_str_field(e, "code"),
        })
    });
    ResultMessage {
        subtype: ResultSubtype::parse(raw.get("subtype").and_then(Value::as_str).unwrap_or("success")),
        session_id: str_field(raw, "session_id").to_string(),
        is_error: raw.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        result: str_field(raw, "result").to_string(),
        errors,
        error,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parses_system_init() {
        let env = parse_line(r#"{"type":"system","subtype":"init","session_id":"abc","model":"claude","tools":[]}"#).unwrap();
        match env.message {
            Message::System(s) => {
                assert_eq!(s.subtype, "init");
                assert_eq!(s.session_id, "abc");
            }
            other => panic!("Expected System, got {other:?}"),
        }
    }

    #[test]
    fn keeps_raw_line() {
        let line = r#"{"type":"user","message":{"role":"user","content":"hi"},"extra":{"n":1}}"#;
        let env = parse_line(line).unwrap();
        assert_eq!(env.raw, line);
        assert_eq!(env.raw_value().unwrap()["extra"]["n"], 1);
        assert_eq!(env.msg_type(), "user");
    }

    #[test]
    fn parses_assistant_blocks() {
        let line = r#"{"type":"assistant","parent_tool_use_id":"toolu_parent","message":{"role":"assistant","content":[
            {"type":"text","text":"Hello"},
            {"type":"thinking","thinking":"hmm"},
            {"type":"tool_use","id":"toolu_1","name":"Read","input":{"file_path":"/a"}},
            {"type":"redacted_thinking","data":"x"},
            {"type":"brand_new","x":1}
        ]}}"#
            .replace('\n', "");
        let env = parse_line(&line).unwrap();
        let Message::Assistant(msg) = env.message else {
            panic!("Expected Assistant");
        };
        assert_eq!(msg.parent_tool_use_id.as_deref(), Some("toolu_parent"));
        let MessageContent::Blocks(blocks) = msg.content else {
            panic!("Expected blocks");
        };
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0], ContentBlock::Text { text: "Hello".into() });
        assert_eq!(blocks[1], ContentBlock::Thinking { thinking: "hmm".into() });
        assert!(matches!(&blocks[2], ContentBlock::ToolUse { kind: ToolUseKind::ToolUse, name, .. } if name == "Read"));
        assert!(matches!(&blocks[3], ContentBlock::Ignored { block_type } if block_type == "redacted_thinking"));
        assert!(matches!(&blocks[4], ContentBlock::Other(_)));
    }

    #[test]
    fn parses_tool_results() {
        let line = r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":"data","is_error":true},{"type":"web_search_tool_result","tool_use_id":"srv_1","content":[]}]}}"#;
        let Message::User(msg) = parse_line(line).unwrap().message else {
            panic!("Expected User");
        };
        let MessageContent::Blocks(blocks) = msg.content else {
            panic!("Expected blocks");
        };
        match &blocks[0] {
            ContentBlock::ToolResult { tool_use_id, is_error, content, .. } => {
                assert_eq!(tool_use_id, "toolu_1");
                assert!(is_error);
                assert_eq!(content, "data");
            }
            other => panic!("Expected ToolResult, got {other:?}"),
        }
        assert!(matches!(&blocks[1], ContentBlock::ToolResult { block_type, is_error: false, .. } if block_type == "web_search_tool_result"));
    }

    #[test]
    fn parses_stream_events() {
        let start = parse_line(r#"{"type":"stream_event","event":{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"Bash","input":{}}}}"#).unwrap();
        let Message::StreamEvent(ev) = start.message else {
            panic!("Expected StreamEvent");
        };
        assert!(matches!(ev.event, StreamEventKind::ContentBlockStart { index: 1, block: ContentBlock::ToolUse { .. } }));

        let delta = parse_line(r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#).unwrap();
        let Message::StreamEvent(ev) = delta.message else {
            panic!("Expected StreamEvent");
        };
        assert_eq!(
            ev.event,
            StreamEventKind::ContentBlockDelta { index: 0, delta: ContentBlock::Text { text: "Hi".into() } }
        );

        let stop = parse_line(r#"{"type":"stream_event","event":{"type":"message_stop"}}"#).unwrap();
        assert!(matches!(stop.message, Message::StreamEvent(StreamEvent { event: StreamEventKind::MessageStop, .. })));
    }

    #[test]
    fn parses_result_fields() {
        let line = r#"{"type":"result","subtype":"error_max_turns","is_error":true,"errors":["too many","turns"],"session_id":"s"}"#;
        let Message::Result(r) = parse_line(line).unwrap().message else {
            panic!("Expected Result");
        };
        assert_eq!(r.subtype, ResultSubtype::ErrorMaxTurns);
        assert!(r.is_error);
        assert_eq!(r.errors, vec!["too many".to_string(), "turns".to_string()]);

        let line = r#"{"type":"result","subtype":"something_new"}"#;
        let Message::Result(r) = parse_line(line).unwrap().message else {
            panic!("Expected Result");
        };
        assert_eq!(r.subtype.as_str(), "something_new");
    }

    #[test]
    fn parses_control_requests() {
        let line = r#"{"type":"control_request","request_id":"req-1","request":{"subtype":"can_use_tool","tool_name":"Bash","input":{"command":"ls"}}}"#;
        let Message::ControlRequest(req) = parse_line(line).unwrap().message else {
            panic!("Expected ControlRequest");
        };
        assert_eq!(req.request_id, "req-1");
        assert!(matches!(req.request, ControlRequestKind::CanUseTool { ref tool_name, .. } if tool_name == "Bash"));

        let line = r#"{"type":"control_request","request_id":"req-2","request":{"subtype":"mcp_message","server_name":"acp","message":{"jsonrpc":"2.0","id":1,"method":"tools/list"}}}"#;
        let Message::ControlRequest(req) = parse_line(line).unwrap().message else {
            panic!("Expected ControlRequest");
        };
        assert!(matches!(req.request, ControlRequestKind::McpMessage { ref server_name, .. } if server_name == "acp"));
    }

    #[test]
    fn housekeeping_and_unknown_types() {
        let msg = parse_line(r#"{"type":"tool_progress","elapsed":3}"#).unwrap().message;
        assert_eq!(msg, Message::Housekeeping { msg_type: "tool_progress".into() });
        let msg = parse_line(r#"{"type":"future_type","data":"something"}"#).unwrap().message;
        assert!(matches!(msg, Message::Unknown { .. }));
    }

    #[test]
    fn rejects_lines_without_type() {
        assert!(matches!(parse_line(r#"{"no":"type"}"#), Err(Error::NdjsonParse(_))));
        assert!(matches!(parse_line("not json"), Err(Error::Json(_))));
    }
}
