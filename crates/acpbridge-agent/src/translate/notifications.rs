//! Agent content blocks → ACP `session/update` notifications.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::debug;

use acpbridge_core::ndjson::{ContentBlock, ImageSource, StreamEvent, StreamEventKind, ToolUseKind};

use super::tool_info::tool_info_from_tool_use;
use super::tool_update::tool_update_from_tool_result;
use crate::acp::{
    self, PlanEntry, PlanEntryPriority, PlanEntryStatus, SessionNotification, SessionUpdate, ToolCall,
    ToolCallStatus, ToolCallUpdate,
};

const TODO_WRITE: &str = "TodoWrite";

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn parse(role: &str) -> Self {
        if role == "assistant" {
            Self::Assistant
        } else {
            Self::User
        }
    }

    fn chunk(self, content: acp::ContentBlock) -> SessionUpdate {
        match self {
            Self::Assistant => SessionUpdate::AgentMessageChunk { content },
            Self::User => SessionUpdate::UserMessageChunk { content },
        }
    }
}

/// A tool invocation seen in the agent's output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUseEntry {
    pub kind: ToolUseKind,
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// Tool uses by id, kept for the life of a session so results can be
/// matched to the call that produced them.
#[derive(Debug, Default)]
pub struct ToolUseCache {
    entries: HashMap<String, ToolUseEntry>,
}

impl ToolUseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ToolUseEntry> {
        self.entries.get(id)
    }

    /// Record `entry`, returning the previous entry for the same id.
    pub fn insert(&mut self, entry: ToolUseEntry) -> Option<ToolUseEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn tool_meta(tool_name: &str, parent: Option<&str>) -> Value {
    json!({ "claudeCode": { "toolName": tool_name, "parentToolCallId": parent } })
}

/// Map a TodoWrite `todos` list onto plan entries.
pub fn plan_entries(todos: &Value) -> Vec<PlanEntry> {
    todos
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter(|t| t.is_object())
                .map(|t| PlanEntry {
                    content: t.get("content").and_then(Value::as_str).unwrap_or("").to_string(),
                    priority: PlanEntryPriority::Medium,
                    status: match t.get("status").and_then(Value::as_str) {
                        Some("in_progress") => PlanEntryStatus::InProgress,
                        Some("completed") => PlanEntryStatus::Completed,
                        _ => PlanEntryStatus::Pending,
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Notification for a plain string message.
pub fn text_notification(session_id: &str, text: &str, role: Role) -> SessionNotification {
    SessionNotification {
        session_id: session_id.to_string(),
        update: role.chunk(acp::ContentBlock::text(text)),
    }
}

fn tool_use_update(
    cache: &mut ToolUseCache,
    kind: ToolUseKind,
    id: &str,
    name: &str,
    input: &Value,
    parent: Option<&str>,
) -> Option<SessionUpdate> {
    let previous = cache.insert(ToolUseEntry {
        kind,
        id: id.to_string(),
        name: name.to_string(),
        input: input.clone(),
    });

    if name == TODO_WRITE {
        let entries = plan_entries(input.get("todos").unwrap_or(&Value::Null));
        return (!entries.is_empty()).then_some(SessionUpdate::Plan { entries });
    }

    let info = tool_info_from_tool_use(name, input);
    let raw_input = (!input.is_null()).then(|| input.clone());

    match previous {
        // Streamed starts usually carry an empty input; the consolidated
        // message repeats the call with the full arguments.
        Some(prev) if prev.input == *input => {
            debug!(tool_use_id = %id, "Skipping repeated tool_use");
            None
        }
        Some(_) => Some(SessionUpdate::ToolCallUpdate(ToolCallUpdate {
            tool_call_id: id.to_string(),
            title: Some(info.title),
            kind: Some(info.kind),
            content: Some(info.content),
            locations: Some(info.locations),
            raw_input,
            meta: Some(tool_meta(name, parent)),
            ..ToolCallUpdate::default()
        })),
        None => Some(SessionUpdate::ToolCall(ToolCall {
            tool_call_id: id.to_string(),
            title: info.title,
            kind: info.kind,
            status: ToolCallStatus::Pending,
            content: info.content,
            locations: info.locations,
            raw_input,
            meta: Some(tool_meta(name, parent)),
        })),
    }
}

fn tool_result_update(
    cache: &ToolUseCache,
    tool_use_id: &str,
    content: &Value,
    is_error: bool,
    parent: Option<&str>,
) -> Option<SessionUpdate> {
    let Some(tool_use) = cache.get(tool_use_id) else {
        debug!(tool_use_id, "Dropping result for unknown tool use");
        return None;
    };
    if tool_use.name == TODO_WRITE {
        return None;
    }

    let update = tool_update_from_tool_result(&tool_use.name, content, is_error);
    Some(SessionUpdate::ToolCallUpdate(ToolCallUpdate {
        tool_call_id: tool_use_id.to_string(),
        title: update.title,
        status: Some(if is_error {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::Completed
        }),
        content: (!update.content.is_empty()).then_some(update.content),
        locations: (!update.locations.is_empty()).then_some(update.locations),
        raw_output: Some(content.clone()),
        meta: Some(tool_meta(&tool_use.name, parent)),
        ..ToolCallUpdate::default()
    }))
}

/// Translate content blocks into notifications, in order.
///
/// Tool uses are recorded in `cache`; results for tool uses the cache has
/// never seen are dropped.
pub fn to_acp_notifications(
    blocks: &[ContentBlock],
    role: Role,
    session_id: &str,
    cache: &mut ToolUseCache,
    parent_tool_use_id: Option<&str>,
) -> Vec<SessionNotification> {
    blocks
        .iter()
        .filter_map(|block| {
            let update = match block {
                ContentBlock::Text { text } => Some(role.chunk(acp::ContentBlock::text(text))),
                ContentBlock::Image {
                    source: ImageSource::Base64 { data, media_type },
                } => Some(role.chunk(acp::ContentBlock::image(data, media_type))),
                ContentBlock::Thinking { thinking } => Some(SessionUpdate::AgentThoughtChunk {
                    content: acp::ContentBlock::text(thinking),
                }),
                ContentBlock::ToolUse { kind, id, name, input } => {
                    tool_use_update(cache, *kind, id, name, input, parent_tool_use_id)
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                    ..
                } => tool_result_update(cache, tool_use_id, content, *is_error, parent_tool_use_id),
                ContentBlock::Image { .. } | ContentBlock::Ignored { .. } | ContentBlock::Other(_) => None,
            }?;
            Some(SessionNotification {
                session_id: session_id.to_string(),
                update,
            })
        })
        .collect()
}

/// Notifications for one partial-message stream event.
///
/// Only block starts and deltas produce output; they are attributed to the
/// assistant.
pub fn stream_event_notifications(
    event: &StreamEvent,
    session_id: &str,
    cache: &mut ToolUseCache,
) -> Vec<SessionNotification> {
    let block = match &event.event {
        StreamEventKind::ContentBlockStart { block, .. } => block,
        StreamEventKind::ContentBlockDelta { delta, .. } => delta,
        _ => return Vec::new(),
    };
    to_acp_notifications(
        std::slice::from_ref(block),
        Role::Assistant,
        session_id,
        cache,
        event.parent_tool_use_id.as_deref(),
    )
}
