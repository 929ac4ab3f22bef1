//! Control requests from the agent: tool permission checks and messages
//! for the in-process tool server.

use serde_json::Value;
use tracing::{debug, info, warn};

use acpbridge_core::ndjson::outbound::{error_response, mcp_response, permission_response};
use acpbridge_core::ndjson::{ControlRequest, ControlRequestKind};
use acpbridge_core::permissions::PermissionDecision;
use acpbridge_core::text::sanitize_title;

use super::modes::ModePolicy;
use super::state::Session;
use crate::acp::{
    PermissionOption, PermissionOptionKind, RequestPermissionOutcome, RequestPermissionRequest, ToolCallUpdate,
};
use crate::subprocess::config::INTERNAL_SERVER_NAME;
use crate::translate::tool_info_from_tool_use;

const ALLOW_ALWAYS: &str = "allow_always";
const ALLOW_ONCE: &str = "allow";
const REJECT_ONCE: &str = "reject";

/// Longest tool title shown in a permission prompt.
const MAX_TITLE_CHARS: usize = 256;

/// Outcome of a `can_use_tool` check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny { message: String },
}

impl Verdict {
    fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }
}

fn permission_options() -> Vec<PermissionOption> {
    [
        (ALLOW_ALWAYS, "Always Allow", PermissionOptionKind::AllowAlways),
        (ALLOW_ONCE, "Allow", PermissionOptionKind::AllowOnce),
        (REJECT_ONCE, "Reject", PermissionOptionKind::RejectOnce),
    ]
    .into_iter()
    .map(|(id, name, kind)| PermissionOption {
        option_id: id.to_string(),
        name: name.to_string(),
        kind,
    })
    .collect()
}

impl Session {
    /// Answer one control request on the agent's stdin.
    pub(super) async fn handle_control(&self, control: ControlRequest) {
        let ControlRequest { request_id, request } = control;
        let reply = match request {
            ControlRequestKind::CanUseTool {
                tool_name,
                input,
                tool_use_id,
            } => match self.can_use_tool(&tool_name, &input, tool_use_id.as_deref()).await {
                Verdict::Allow => permission_response(&request_id, true, &input, ""),
                Verdict::Deny { message } => permission_response(&request_id, false, &input, &message),
            },
            ControlRequestKind::McpMessage { server_name, message } if server_name == INTERNAL_SERVER_NAME => {
                mcp_response(&request_id, self.tools.handle_message(&message).await)
            }
            ControlRequestKind::McpMessage { server_name, .. } => {
                warn!(session_id = %self.id, server = %server_name, "MCP message for unknown server");
                error_response(&request_id, &format!("Unknown MCP server: {server_name}"))
            }
            ControlRequestKind::Unknown { subtype, .. } => {
                warn!(session_id = %self.id, subtype = %subtype, "Unsupported control request");
                error_response(&request_id, &format!("Unsupported control request: {subtype}"))
            }
        };
        if let Err(e) = self.process.send(&reply).await {
            warn!(session_id = %self.id, request_id = %request_id, error = %e, "Failed to answer control request");
        }
    }

    /// Decide whether the agent may run a tool.
    ///
    /// Settings rules come first, then tools the user allowed for the rest of
    /// the session, then the permission mode. Whatever is still undecided is
    /// put to the user.
    pub async fn can_use_tool(&self, tool_name: &str, input: &Value, tool_use_id: Option<&str>) -> Verdict {
        let check = self.settings.check_permission(tool_name, input);
        match check.decision {
            PermissionDecision::Deny => {
                let rule = check.rule.unwrap_or_default();
                info!(session_id = %self.id, tool = tool_name, rule = %rule, "Tool denied by rule");
                return Verdict::deny(format!("Permission to use {tool_name} was denied by rule {rule}"));
            }
            PermissionDecision::Allow => {
                debug!(session_id = %self.id, tool = tool_name, rule = ?check.rule, "Tool allowed by rule");
                return Verdict::Allow;
            }
            PermissionDecision::Ask => {}
        }

        if self.is_always_allowed(tool_name) {
            debug!(session_id = %self.id, tool = tool_name, "Session grant hit");
            return Verdict::Allow;
        }

        let mode = self.mode();
        match mode.policy(tool_name) {
            ModePolicy::Allow => Verdict::Allow,
            ModePolicy::Deny => {
                info!(session_id = %self.id, tool = tool_name, mode = %mode, "Tool denied by mode");
                Verdict::deny(format!("Permission to use {tool_name} was denied in {mode} mode"))
            }
            ModePolicy::Ask => self.ask_client(tool_name, input, tool_use_id).await,
        }
    }

    async fn ask_client(&self, tool_name: &str, input: &Value, tool_use_id: Option<&str>) -> Verdict {
        let info = tool_info_from_tool_use(tool_name, input);
        let request = RequestPermissionRequest {
            session_id: self.id.clone(),
            tool_call: ToolCallUpdate {
                tool_call_id: tool_use_id.unwrap_or(tool_name).to_string(),
                title: Some(sanitize_title(&info.title, MAX_TITLE_CHARS)),
                kind: Some(info.kind),
                content: (!info.content.is_empty()).then_some(info.content),
                locations: (!info.locations.is_empty()).then_some(info.locations),
                raw_input: Some(input.clone()),
                ..ToolCallUpdate::default()
            },
            options: permission_options(),
        };

        let outcome = match self.client.request_permission(request).await {
            Ok(resp) => resp.outcome,
            Err(e) => {
                warn!(session_id = %self.id, tool = tool_name, error = %e, "Permission request failed");
                return Verdict::deny(format!("Permission request failed: {}", e.message));
            }
        };

        match outcome {
            RequestPermissionOutcome::Selected { option_id } if option_id == ALLOW_ALWAYS => {
                info!(session_id = %self.id, tool = tool_name, "Tool allowed for the session");
                self.allow_always(tool_name);
                Verdict::Allow
            }
            RequestPermissionOutcome::Selected { option_id } if option_id == ALLOW_ONCE => Verdict::Allow,
            RequestPermissionOutcome::Selected { .. } | RequestPermissionOutcome::Cancelled => {
                info!(session_id = %self.id, tool = tool_name, "User denied permission");
                Verdict::deny("User denied permission")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_offer_always_once_and_reject() {
        let options = permission_options();
        let ids: Vec<&str> = options.iter().map(|o| o.option_id.as_str()).collect();
        assert_eq!(ids, vec!["allow_always", "allow", "reject"]);
        assert_eq!(options[0].kind, PermissionOptionKind::AllowAlways);
        assert_eq!(options[2].name, "Reject");
    }
}
