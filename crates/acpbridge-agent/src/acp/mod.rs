//! Agent Client Protocol surface.
//!
//! [`Client`] is what the bridge calls on the editor; [`Agent`] is what the
//! JSON-RPC connection dispatches inbound requests to.

mod error;
pub mod types;

use async_trait::async_trait;

pub use error::AcpError;
pub use types::*;

/// Methods the bridge invokes on the connected editor.
#[async_trait]
pub trait Client: Send + Sync {
    /// `session/update` notification.
    async fn session_update(&self, notification: SessionNotification) -> Result<(), AcpError>;

    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse, AcpError>;

    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<ReadTextFileResponse, AcpError>;

    async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<(), AcpError>;

    async fn create_terminal(
        &self,
        request: CreateTerminalRequest,
    ) -> Result<CreateTerminalResponse, AcpError>;

    async fn terminal_output(&self, request: TerminalRequest) -> Result<TerminalOutputResponse, AcpError>;

    async fn wait_for_terminal_exit(&self, request: TerminalRequest) -> Result<TerminalExitStatus, AcpError>;

    async fn kill_terminal(&self, request: TerminalRequest) -> Result<(), AcpError>;

    async fn release_terminal(&self, request: TerminalRequest) -> Result<(), AcpError>;
}

/// Inbound ACP methods served by the bridge.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, AcpError>;

    async fn new_session(&self, request: NewSessionRequest) -> Result<NewSessionResponse, AcpError>;

    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, AcpError>;

    /// `session/cancel` is a notification; errors are only logged.
    async fn cancel(&self, notification: CancelNotification) -> Result<(), AcpError>;

    async fn set_session_mode(
        &self,
        request: SetSessionModeRequest,
    ) -> Result<SetSessionModeResponse, AcpError>;
}
