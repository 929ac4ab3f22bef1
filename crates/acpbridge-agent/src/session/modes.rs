//! Permission modes offered to the client.

use std::fmt;

use acpbridge_core::permissions::{ACP_EDIT, ACP_WRITE};

use crate::acp::SessionMode;

/// Tools `acceptEdits` lets through without asking.
const EDIT_TOOLS: &[&str] = &["Edit", "Write", "MultiEdit", "NotebookEdit", ACP_EDIT, ACP_WRITE];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    Plan,
    DontAsk,
    BypassPermissions,
}

/// What a mode does with a tool call that no rule decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePolicy {
    Allow,
    Deny,
    Ask,
}

impl PermissionMode {
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::AcceptEdits,
        Self::Plan,
        Self::DontAsk,
        Self::BypassPermissions,
    ];

    pub fn parse(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == id)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::DontAsk => "dontAsk",
            Self::BypassPermissions => "bypassPermissions",
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::AcceptEdits => "Accept Edits",
            Self::Plan => "Plan",
            Self::DontAsk => "Don't Ask",
            Self::BypassPermissions => "Bypass Permissions",
        }
    }

    const fn description(self) -> &'static str {
        match self {
            Self::Default => "Normal operation with permission prompts",
            Self::AcceptEdits => "Automatically accept file edits",
            Self::Plan => "Plan-only mode, no execution",
            Self::DontAsk => "Skip permission prompts for allowed tools",
            Self::BypassPermissions => "Skip all permission prompts",
        }
    }

    pub fn to_session_mode(self) -> SessionMode {
        SessionMode {
            id: self.as_str().to_string(),
            name: self.name().to_string(),
            description: Some(self.description().to_string()),
        }
    }

    /// Decide a tool call the permission rules left open.
    pub fn policy(self, tool_name: &str) -> ModePolicy {
        match self {
            Self::BypassPermissions => ModePolicy::Allow,
            Self::AcceptEdits if EDIT_TOOLS.contains(&tool_name) => ModePolicy::Allow,
            Self::DontAsk => ModePolicy::Deny,
            Self::AcceptEdits | Self::Default | Self::Plan => ModePolicy::Ask,
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modes the client may pick from.
pub fn available_modes(allow_bypass: bool) -> Vec<SessionMode> {
    PermissionMode::ALL
        .into_iter()
        .filter(|m| allow_bypass || *m != PermissionMode::BypassPermissions)
        .map(PermissionMode::to_session_mode)
        .collect()
}

/// Bypass is withheld from root unless running in a declared sandbox.
pub fn bypass_allowed() -> bool {
    bypass_allowed_for(is_root(), std::env::var_os("IS_SANDBOX").is_some())
}

const fn bypass_allowed_for(root: bool, sandboxed: bool) -> bool {
    !root || sandboxed
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    #[allow(unsafe_code)]
    let euid = unsafe { libc::geteuid() };
    euid == 0
}

#[cfg(not(unix))]
const fn is_root() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_mode_id() {
        for mode in PermissionMode::ALL {
            assert_eq!(PermissionMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(PermissionMode::parse("yolo"), None);
        assert_eq!(PermissionMode::parse("Default"), None);
    }

    #[test]
    fn bypass_is_withheld_when_not_allowed() {
        let ids: Vec<String> = available_modes(false).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["default", "acceptEdits", "plan", "dontAsk"]);
        assert_eq!(available_modes(true).len(), 5);
        assert_eq!(available_modes(true)[4].name, "Bypass Permissions");
    }

    #[test]
    fn root_needs_a_sandbox_for_bypass() {
        assert!(bypass_allowed_for(false, false));
        assert!(bypass_allowed_for(true, true));
        assert!(!bypass_allowed_for(true, false));
    }

    #[test]
    fn mode_policies() {
        assert_eq!(PermissionMode::BypassPermissions.policy("mcp__acp__Bash"), ModePolicy::Allow);
        assert_eq!(PermissionMode::AcceptEdits.policy(ACP_EDIT), ModePolicy::Allow);
        assert_eq!(PermissionMode::AcceptEdits.policy("Write"), ModePolicy::Allow);
        assert_eq!(PermissionMode::AcceptEdits.policy("mcp__acp__Bash"), ModePolicy::Ask);
        assert_eq!(PermissionMode::DontAsk.policy(ACP_EDIT), ModePolicy::Deny);
        assert_eq!(PermissionMode::Plan.policy(ACP_EDIT), ModePolicy::Ask);
        assert_eq!(PermissionMode::Default.policy("WebFetch"), ModePolicy::Ask);
    }
}
