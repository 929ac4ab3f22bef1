//! The prompt loop: send one user message, then translate the agent's
//! output until the turn ends.

use serde_json::json;
use tracing::{debug, error, info, warn};

use acpbridge_core::ndjson::outbound::UserEnvelope;
use acpbridge_core::ndjson::{ChatMessage, ContentBlock, Message, MessageContent, ResultMessage, ResultSubtype};

use super::error::SessionError;
use super::state::Session;
use crate::acp::{self, AcpError, StopReason};
use crate::translate::{
    Role, ToolUseCache, prompt_to_content, stream_event_notifications, text_notification, to_acp_notifications,
};

const LOGIN_PROMPT: &str = "Please run /login";
const LOCAL_STDOUT_OPEN: &str = "<local-command-stdout>";
const LOCAL_STDOUT_CLOSE: &str = "</local-command-stdout>";
const LOCAL_STDERR_OPEN: &str = "<local-command-stderr>";

fn internal_error(text: impl Into<String>) -> AcpError {
    AcpError::internal_error("Internal error").with_data(json!({ "error": text.into() }))
}

fn joined_errors(result: &ResultMessage) -> String {
    if result.errors.is_empty() {
        result.subtype.as_str().to_string()
    } else {
        result.errors.join(", ")
    }
}

/// Map the final `result` line of a turn to a stop reason or an error.
pub fn stop_reason_for(result: &ResultMessage) -> Result<StopReason, AcpError> {
    match &result.subtype {
        ResultSubtype::Success => {
            if result.result.contains(LOGIN_PROMPT) {
                return Err(AcpError::auth_required());
            }
            if result.is_error {
                return Err(internal_error(result.result.clone()));
            }
            Ok(StopReason::EndTurn)
        }
        ResultSubtype::ErrorMaxTurns
        | ResultSubtype::ErrorMaxBudgetUsd
        | ResultSubtype::ErrorMaxStructuredOutputRetries => {
            if result.is_error {
                return Err(internal_error(joined_errors(result)));
            }
            Ok(StopReason::MaxTurnRequests)
        }
        ResultSubtype::ErrorDuringExecution => {
            if result.is_error {
                return Err(internal_error(joined_errors(result)));
            }
            Ok(StopReason::EndTurn)
        }
        ResultSubtype::Unknown(_) => Ok(StopReason::EndTurn),
    }
}

/// The agent's own sign-in nag, which the client has its own flow for.
fn is_login_prompt(blocks: &[ContentBlock]) -> bool {
    matches!(blocks, [ContentBlock::Text { text }] if text.contains(LOGIN_PROMPT))
}

impl Session {
    /// Run one turn. Concurrent prompts on the same session queue up.
    pub async fn prompt(&self, prompt: &[acp::ContentBlock]) -> Result<StopReason, SessionError> {
        let mut cache = self.turn.lock().await;
        self.begin_turn();

        let envelope = UserEnvelope::new(&self.id, prompt_to_content(prompt));
        self.process.send(&envelope).await?;
        info!(session_id = %self.id, blocks = prompt.len(), "Prompt sent");

        loop {
            if self.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }

            let next = tokio::select! {
                next = self.process.recv() => next?,
                () = self.process.closed() => None,
            };
            let Some(envelope) = next else {
                let reason = if self.is_cancelled() {
                    StopReason::Cancelled
                } else {
                    StopReason::EndTurn
                };
                info!(session_id = %self.id, ?reason, "Agent output closed");
                return Ok(reason);
            };

            match envelope.message {
                Message::Result(result) => {
                    debug!(session_id = %self.id, subtype = result.subtype.as_str(), "Turn result");
                    if self.is_cancelled() {
                        return Ok(StopReason::Cancelled);
                    }
                    return stop_reason_for(&result).map_err(SessionError::Client);
                }
                Message::StreamEvent(event) => {
                    if self.is_cancelled() {
                        continue;
                    }
                    let notifications = stream_event_notifications(&event, &self.id, &mut cache);
                    if !notifications.is_empty() {
                        self.mark_stream_events_seen();
                    }
                    self.forward(notifications).await;
                }
                Message::Assistant(message) => {
                    if !self.is_cancelled() {
                        self.handle_message(Role::Assistant, &message, &mut cache).await;
                    }
                }
                Message::User(message) => {
                    if !self.is_cancelled() {
                        self.handle_message(Role::User, &message, &mut cache).await;
                    }
                }
                Message::ControlRequest(request) => {
                    if self.is_cancelled() {
                        continue;
                    }
                    tokio::select! {
                        () = self.handle_control(request) => {}
                        () = self.process.closed() => {}
                    }
                }
                Message::System(system) => {
                    debug!(session_id = %self.id, subtype = %system.subtype, "System message");
                }
                Message::Housekeeping { .. } => {}
                Message::Unknown { msg_type, .. } => {
                    warn!(session_id = %self.id, msg_type = %msg_type, "Unknown message type");
                }
            }
        }
    }

    async fn handle_message(&self, kind: Role, message: &ChatMessage, cache: &mut ToolUseCache) {
        let role = if message.role.is_empty() {
            kind
        } else {
            Role::parse(&message.role)
        };
        let parent = message.parent_tool_use_id.as_deref();

        let notifications = match &message.content {
            MessageContent::Text(text) => {
                if text.contains(LOCAL_STDOUT_OPEN) {
                    if !text.contains("Context Usage") {
                        return;
                    }
                    let cleaned = text.replace(LOCAL_STDOUT_OPEN, "").replace(LOCAL_STDOUT_CLOSE, "");
                    vec![text_notification(&self.id, &cleaned, Role::Assistant)]
                } else if text.contains(LOCAL_STDERR_OPEN) {
                    error!(session_id = %self.id, output = %text, "Local command failed");
                    return;
                } else if kind == Role::User || text.is_empty() {
                    return;
                } else {
                    vec![text_notification(&self.id, text, role)]
                }
            }
            MessageContent::Blocks(blocks) => {
                if kind == Role::User && matches!(blocks.as_slice(), [ContentBlock::Text { .. }]) {
                    return;
                }
                if kind == Role::Assistant && is_login_prompt(blocks) {
                    return;
                }
                if kind == Role::Assistant && self.stream_events_seen() {
                    let remaining: Vec<ContentBlock> = blocks
                        .iter()
                        .filter(|b| !matches!(b, ContentBlock::Text { .. } | ContentBlock::Thinking { .. }))
                        .cloned()
                        .collect();
                    to_acp_notifications(&remaining, role, &self.id, cache, parent)
                } else {
                    to_acp_notifications(blocks, role, &self.id, cache, parent)
                }
            }
        };
        self.forward(notifications).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn result(subtype: &str, is_error: bool, text: &str, errors: &[&str]) -> ResultMessage {
        ResultMessage {
            subtype: ResultSubtype::parse(subtype),
            is_error,
            result: text.to_string(),
            errors: errors.iter().map(ToString::to_string).collect(),
            ..ResultMessage::default()
        }
    }

    #[test]
    fn success_ends_the_turn() {
        assert_eq!(stop_reason_for(&result("success", false, "done", &[])), Ok(StopReason::EndTurn));
    }

    #[test]
    fn login_prompt_requires_auth() {
        let err = stop_reason_for(&result("success", true, "Invalid API key · Please run /login", &[])).unwrap_err();
        assert!(err.is_auth_required());
    }

    #[test]
    fn flagged_success_is_internal_error() {
        let err = stop_reason_for(&result("success", true, "overloaded", &[])).unwrap_err();
        assert_eq!(err.code, AcpError::INTERNAL_ERROR);
        assert_eq!(err.data, Some(json!({"error": "overloaded"})));
    }

    #[test]
    fn limits_stop_with_max_turn_requests() {
        for subtype in ["error_max_turns", "error_max_budget_usd", "error_max_structured_output_retries"] {
            assert_eq!(stop_reason_for(&result(subtype, false, "", &[])), Ok(StopReason::MaxTurnRequests));
        }
    }

    #[test]
    fn flagged_limits_join_errors() {
        let err = stop_reason_for(&result("error_max_turns", true, "", &["too many", "really"])).unwrap_err();
        assert_eq!(err.data, Some(json!({"error": "too many, really"})));
        let err = stop_reason_for(&result("error_max_budget_usd", true, "", &[])).unwrap_err();
        assert_eq!(err.data, Some(json!({"error": "error_max_budget_usd"})));
    }

    #[test]
    fn execution_errors() {
        assert_eq!(stop_reason_for(&result("error_during_execution", false, "", &[])), Ok(StopReason::EndTurn));
        let err = stop_reason_for(&result("error_during_execution", true, "", &["boom"])).unwrap_err();
        assert_eq!(err.data, Some(json!({"error": "boom"})));
    }

    #[test]
    fn unknown_subtypes_end_the_turn() {
        assert_eq!(stop_reason_for(&result("something_new", true, "", &[])), Ok(StopReason::EndTurn));
    }

    #[test]
    fn login_prompt_detection() {
        assert!(is_login_prompt(&[ContentBlock::Text {
            text: "Please run /login".into()
        }]));
        assert!(!is_login_prompt(&[
            ContentBlock::Text {
                text: "Please run /login".into()
            },
            ContentBlock::Text { text: "more".into() },
        ]));
        assert!(!is_login_prompt(&[ContentBlock::Text { text: "hi".into() }]));
    }
}
