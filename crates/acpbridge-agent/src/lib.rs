//! acpbridge agent library
//!
//! Serves the Agent Client Protocol on stdio by driving Claude Code CLI
//! processes:
//! - ACP schema types and the JSON-RPC connection to the editor
//! - Agent process spawning and NDJSON exchange
//! - Translation of agent output into session updates
//! - Per-session prompt loop, permission gate and mode handling
//! - In-process file and terminal tools backed by the editor

pub mod acp;
pub mod rpc;
pub mod session;
pub mod subprocess;
pub mod tools;
pub mod translate;
