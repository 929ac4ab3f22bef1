//! Lines written to the agent's stdin.

use serde::Serialize;
use serde_json::{Value, json};

/// Message body of a user turn.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserMessageBody {
    pub role: String,
    pub content: Vec<Value>,
}

/// `{"type":"user", ...}` envelope that starts a turn.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserEnvelope {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub message: UserMessageBody,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

impl UserEnvelope {
    pub fn new(session_id: impl Into<String>, content: Vec<Value>) -> Self {
        Self {
            msg_type: "user",
            message: UserMessageBody {
                role: "user".to_string(),
                content,
            },
            session_id: session_id.into(),
            parent_tool_use_id: None,
        }
    }
}

fn control_success(request_id: &str, response: Value) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response
        }
    })
}

/// Answer a `can_use_tool` request.
///
/// `updatedInput` must be the original tool input; an empty object would
/// replace the tool's arguments.
pub fn permission_response(request_id: &str, allowed: bool, input: &Value, message: &str) -> Value {
    let response = if allowed {
        json!({ "behavior": "allow", "updatedInput": input })
    } else {
        json!({ "behavior": "deny", "message": message, "interrupt": true })
    };
    control_success(request_id, response)
}

/// Answer an `mcp_message` request with the server's JSON-RPC reply.
pub fn mcp_response(request_id: &str, reply: Value) -> Value {
    control_success(request_id, json!({ "mcp_response": reply }))
}

/// Reject a control request the bridge does not handle.
pub fn error_response(request_id: &str, error: &str) -> Value {
    json!({
        "type": "control_response",
        "response": {
            "subtype": "error",
            "request_id": request_id,
            "error": error
        }
    })
}

/// Ask the agent to switch permission mode mid-session.
pub fn set_permission_mode_request(request_id: &str, mode: &str) -> Value {
    json!({
        "type": "control_request",
        "request_id": request_id,
        "request": { "subtype": "set_permission_mode", "mode": mode }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn user_envelope_shape() {
        let env = UserEnvelope::new("sess-1", vec![json!({"type":"text","text":"hi"})]);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "user");
        assert_eq!(v["message"]["role"], "user");
        assert_eq!(v["message"]["content"][0]["text"], "hi");
        assert_eq!(v["session_id"], "sess-1");
        assert!(v.get("parent_tool_use_id").is_none());
    }

    #[test]
    fn allow_echoes_original_input() {
        let input = json!({"command": "ls -la"});
        let v = permission_response("req-1", true, &input, "");
        assert_eq!(v["type"], "control_response");
        assert_eq!(v["response"]["subtype"], "success");
        assert_eq!(v["response"]["request_id"], "req-1");
        assert_eq!(v["response"]["response"]["behavior"], "allow");
        assert_eq!(v["response"]["response"]["updatedInput"], input);
    }

    #[test]
    fn deny_interrupts_with_message() {
        let v = permission_response("req-2", false, &json!({}), "User denied permission");
        let inner = &v["response"]["response"];
        assert_eq!(inner["behavior"], "deny");
        assert_eq!(inner["message"], "User denied permission");
        assert_eq!(inner["interrupt"], true);
        assert!(inner.get("updatedInput").is_none());
    }

    #[test]
    fn mcp_reply_is_nested() {
        let reply = json!({"jsonrpc":"2.0","id":3,"result":{"tools":[]}});
        let v = mcp_response("req-3", reply.clone());
        assert_eq!(v["response"]["response"]["mcp_response"], reply);
    }

    #[test]
    fn error_reply_carries_text() {
        let v = error_response("req-4", "Unsupported control request: interrupt");
        assert_eq!(v["response"]["subtype"], "error");
        assert_eq!(v["response"]["error"], "Unsupported control request: interrupt");
    }
}
