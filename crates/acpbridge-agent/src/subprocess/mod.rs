//! Agent process transport.

pub mod config;
pub mod process;

pub use config::{McpServerConfig, SpawnConfig, map_mcp_servers};
pub use process::AgentProcess;

/// Errors from the agent process channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to spawn agent process: {reason}")]
    SpawnFailed { reason: String },

    #[error("Failed to write to agent process: {reason}")]
    WriteFailed { reason: String },

    #[error("Agent process input is closed")]
    Closed,

    #[error("Agent output line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("Malformed agent output: {0}")]
    Malformed(#[from] acpbridge_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
