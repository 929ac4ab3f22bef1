//! Per-session state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as TurnLock;
use tracing::warn;

use acpbridge_core::SettingsManager;

use super::modes::PermissionMode;
use crate::acp::{Client, SessionNotification};
use crate::subprocess::AgentProcess;
use crate::tools::ToolServer;
use crate::translate::ToolUseCache;

/// Fields flipped from outside the prompt loop.
#[derive(Debug, Default)]
struct Flags {
    cancelled: bool,
    stream_events_seen: bool,
    mode: PermissionMode,
    always_allowed: HashSet<String>,
}

/// One ACP session bound to one agent process.
///
/// `turn` is held for the whole of a prompt, so turns on the same session
/// run one at a time and the tool-use cache has a single writer. `flags`
/// is a separate lock so cancel and mode changes never wait on a turn.
pub struct Session {
    pub(super) id: String,
    pub(super) process: Arc<AgentProcess>,
    pub(super) client: Arc<dyn Client>,
    pub(super) settings: Arc<SettingsManager>,
    pub(super) tools: ToolServer,
    pub(super) turn: TurnLock<ToolUseCache>,
    flags: Mutex<Flags>,
    next_request: AtomicU64,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        process: Arc<AgentProcess>,
        client: Arc<dyn Client>,
        settings: Arc<SettingsManager>,
        tools: ToolServer,
        mode: PermissionMode,
    ) -> Self {
        Self {
            id: id.into(),
            process,
            client,
            settings,
            tools,
            turn: TurnLock::new(ToolUseCache::new()),
            flags: Mutex::new(Flags {
                mode,
                ..Flags::default()
            }),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn process(&self) -> &AgentProcess {
        &self.process
    }

    fn flags(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn mode(&self) -> PermissionMode {
        self.flags().mode
    }

    pub(super) fn set_mode(&self, mode: PermissionMode) {
        self.flags().mode = mode;
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags().cancelled
    }

    /// Flag the current turn as cancelled and stop the agent.
    pub async fn cancel(&self) {
        self.flags().cancelled = true;
        self.process.close().await;
    }

    /// Clear per-turn flags at the start of a prompt.
    pub(super) fn begin_turn(&self) {
        let mut flags = self.flags();
        flags.cancelled = false;
        flags.stream_events_seen = false;
    }

    pub(super) fn mark_stream_events_seen(&self) {
        self.flags().stream_events_seen = true;
    }

    pub(super) fn stream_events_seen(&self) -> bool {
        self.flags().stream_events_seen
    }

    pub(super) fn allow_always(&self, tool_name: &str) {
        self.flags().always_allowed.insert(tool_name.to_string());
    }

    pub(super) fn is_always_allowed(&self, tool_name: &str) -> bool {
        self.flags().always_allowed.contains(tool_name)
    }

    /// Id for a control request sent to the agent.
    pub(super) fn next_request_id(&self) -> String {
        format!("acpbridge-{}", self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    /// Forward notifications in order. Delivery failures are logged only.
    pub(super) async fn forward(&self, notifications: Vec<SessionNotification>) {
        for notification in notifications {
            if let Err(e) = self.client.session_update(notification).await {
                warn!(session_id = %self.id, error = %e, "Failed to deliver session update");
            }
        }
    }
}
