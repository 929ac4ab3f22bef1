//! acpbridge core library
//!
//! Protocol-independent building blocks shared by the agent:
//! - Unified diff computation and parsing
//! - NDJSON envelope parsing for the Claude Code stream-json protocol
//! - Settings discovery and merging across the four settings sources
//! - Permission rule parsing and evaluation
//! - Text helpers used when rendering tool output

pub mod diff;
pub mod error;
pub mod ndjson;
pub mod permissions;
pub mod settings;
pub mod text;
pub mod tracing_init;

pub use diff::{DiffHunk, DiffLine, DiffPatch};
pub use error::{Error, Result};
pub use permissions::{PermissionCheck, PermissionDecision};
pub use settings::{ClaudeSettings, PermissionSettings, SettingsManager};
