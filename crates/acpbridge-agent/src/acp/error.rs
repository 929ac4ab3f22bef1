//! JSON-RPC error carried across the ACP boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error returned by an ACP method, or received from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct AcpError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl AcpError {
    pub const AUTH_REQUIRED: i64 = -32000;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn auth_required() -> Self {
        Self::new(Self::AUTH_REQUIRED, "Authentication required")
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    pub const fn is_auth_required(&self) -> bool {
        self.code == Self::AUTH_REQUIRED
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_use_jsonrpc_codes() {
        assert_eq!(AcpError::auth_required().code, -32000);
        assert!(AcpError::auth_required().is_auth_required());
        assert_eq!(AcpError::invalid_params("invalid mode").code, -32602);
        assert_eq!(AcpError::method_not_found("x/y").message, "Method not found: x/y");
        assert_eq!(AcpError::internal_error("boom").code, -32603);
    }

    #[test]
    fn serializes_without_empty_data() {
        let v = serde_json::to_value(AcpError::internal_error("boom")).unwrap();
        assert_eq!(v, json!({"code": -32603, "message": "boom"}));
        let e = AcpError::internal_error("Internal error").with_data(json!({"error": "too many turns"}));
        let v = serde_json::to_value(e).unwrap();
        assert_eq!(v["data"]["error"], "too many turns");
    }
}
