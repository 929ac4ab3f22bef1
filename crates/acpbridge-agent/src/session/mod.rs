//! ACP sessions, each driving one agent process.
//!
//! A session moves between idle and awaiting-response once per prompt. The
//! [`SessionManager`] owns the registry and implements the ACP agent
//! methods on top of it.

mod control;
mod error;
mod manager;
mod modes;
mod state;
mod turn;

pub use control::Verdict;
pub use error::SessionError;
pub use manager::{ManagerConfig, SessionManager};
pub use modes::{ModePolicy, PermissionMode, available_modes, bypass_allowed};
pub use state::Session;
pub use turn::stop_reason_for;
