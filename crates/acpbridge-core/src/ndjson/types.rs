//! Message types for the Claude Code stream-json protocol.

use serde_json::Value;

/// A decoded stdout line together with the line it came from.
///
/// The typed model covers the fields the bridge acts on; `raw` keeps the
/// exact text for anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub raw: String,
}

impl Envelope {
    /// Re-decode the original line as untyped JSON.
    pub fn raw_value(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.raw)
    }

    /// The `type` discriminant of the line.
    pub fn msg_type(&self) -> &str {
        self.message.msg_type()
    }
}

/// Canonical message kinds emitted by the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System(SystemMessage),
    Assistant(ChatMessage),
    User(ChatMessage),
    StreamEvent(StreamEvent),
    ControlRequest(ControlRequest),
    Result(ResultMessage),
    /// Progress and bookkeeping lines that carry nothing for the client.
    Housekeeping { msg_type: String },
    Unknown { msg_type: String, payload: Value },
}

impl Message {
    pub fn msg_type(&self) -> &str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::StreamEvent(_) => "stream_event",
            Self::ControlRequest(_) => "control_request",
            Self::Result(_) => "result",
            Self::Housekeeping { msg_type } | Self::Unknown { msg_type, .. } => msg_type,
        }
    }
}

/// `system` lines (init, status, compaction notices).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemMessage {
    pub subtype: String,
    pub session_id: String,
    pub model: String,
}

/// An `assistant` or `user` message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
    pub parent_tool_use_id: Option<String>,
}

/// Message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// Which flavour of tool invocation a tool-use block is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolUseKind {
    ToolUse,
    ServerToolUse,
    McpToolUse,
}

/// Image payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Base64 { data: String, media_type: String },
    Url { url: String },
    Other(Value),
}

/// One content block, or one streaming delta folded onto the same shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// `text` blocks and `text_delta` deltas.
    Text { text: String },
    Image { source: ImageSource },
    /// `thinking` blocks and `thinking_delta` deltas.
    Thinking { thinking: String },
    ToolUse {
        kind: ToolUseKind,
        id: String,
        name: String,
        input: Value,
    },
    /// `tool_result` and every `*_tool_result` variant.
    ToolResult {
        block_type: String,
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
    /// Known block types that never produce output.
    Ignored { block_type: String },
    Other(Value),
}

/// `stream_event` lines wrap one Messages API streaming event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub event: StreamEventKind,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    ContentBlockStart { index: u64, block: ContentBlock },
    ContentBlockDelta { index: u64, delta: ContentBlock },
    ContentBlockStop { index: u64 },
    MessageStart,
    MessageDelta,
    MessageStop,
    Unknown(Value),
}

/// A request from the agent that expects a `control_response`.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlRequest {
    pub request_id: String,
    pub request: ControlRequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequestKind {
    /// Permission check for a tool the agent is about to run.
    CanUseTool {
        tool_name: String,
        input: Value,
        tool_use_id: Option<String>,
    },
    /// JSON-RPC message addressed to an in-process MCP server.
    McpMessage { server_name: String, message: Value },
    Unknown { subtype: String, payload: Value },
}

/// Final line of a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMessage {
    pub subtype: ResultSubtype,
    pub session_id: String,
    pub is_error: bool,
    pub result: String,
    pub errors: Vec<String>,
    pub error: Option<AgentError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ResultSubtype {
    #[default]
    Success,
    ErrorMaxTurns,
    ErrorMaxBudgetUsd,
    ErrorMaxStructuredOutputRetries,
    ErrorDuringExecution,
    Unknown(String),
}

impl ResultSubtype {
    pub fn parse(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "error_max_turns" => Self::ErrorMaxTurns,
            "error_max_budget_usd" => Self::ErrorMaxBudgetUsd,
            "error_max_structured_output_retries" => Self::ErrorMaxStructuredOutputRetries,
            "error_during_execution" => Self::ErrorDuringExecution,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::ErrorMaxTurns => "error_max_turns",
            Self::ErrorMaxBudgetUsd => "error_max_budget_usd",
            Self::ErrorMaxStructuredOutputRetries => "error_max_structured_output_retries",
            Self::ErrorDuringExecution => "error_during_execution",
            Self::Unknown(s) => s,
        }
    }
}

/// Structured `error` field on some result lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentError {
    pub message: String,
    pub code: Option<String>,
}
