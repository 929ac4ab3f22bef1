//! NDJSON protocol for the Claude Code CLI.
//!
//! Inbound lines are decoded by [`parse_line`] into an [`Envelope`];
//! outbound lines are built with the helpers in [`outbound`].

pub mod outbound;
mod parser;
mod types;

pub use parser::{parse_block, parse_line, parse_value};
pub use types::*;
