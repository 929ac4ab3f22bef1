//! Session-level errors and their mapping onto ACP errors.

use crate::acp::AcpError;
use crate::subprocess::TransportError;

/// Errors raised while serving a session request.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("invalid mode: {mode}")]
    InvalidMode { mode: String },

    #[error("Agent transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Client error: {0}")]
    Client(#[from] AcpError),
}

impl From<SessionError> for AcpError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { .. } => Self::invalid_params(err.to_string()),
            SessionError::InvalidMode { .. } => Self::invalid_params("invalid mode"),
            SessionError::Transport(e) => Self::internal_error(e.to_string()),
            SessionError::Client(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_onto_jsonrpc_codes() {
        let e: AcpError = SessionError::NotFound {
            session_id: "abc".into(),
        }
        .into();
        assert_eq!(e.code, AcpError::INVALID_PARAMS);
        assert_eq!(e.message, "Session not found: abc");

        let e: AcpError = SessionError::InvalidMode { mode: "yolo".into() }.into();
        assert_eq!(e, AcpError::invalid_params("invalid mode"));

        let e: AcpError = SessionError::Transport(TransportError::Closed).into();
        assert_eq!(e.code, AcpError::INTERNAL_ERROR);

        let e: AcpError = SessionError::Client(AcpError::auth_required()).into();
        assert!(e.is_auth_required());
    }
}
