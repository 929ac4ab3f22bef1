//! `Bash`, `BashOutput` and `KillShell` over client terminals.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ToolOutput, ToolServer};
use crate::acp::{CreateTerminalRequest, NameValue, TerminalExitStatus, TerminalRequest};
use crate::translate::{input_bool, input_str, input_u64};

/// Default deadline for foreground commands and blocking output reads.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Output retained by the client per terminal.
pub const OUTPUT_BYTE_LIMIT: u64 = 32_000;

/// Lifecycle of a command as reported to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Started,
    Exited,
    Killed,
    TimedOut,
}

/// Background commands started by `Bash` with `run_in_background`.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTerminals {
    inner: Arc<Mutex<HashMap<String, CommandStatus>>>,
}

impl BackgroundTerminals {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, terminal_id: &str) {
        self.mark(terminal_id, CommandStatus::Started);
    }

    fn mark(&self, terminal_id: &str, status: CommandStatus) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(terminal_id.to_string(), status);
    }

    pub fn status(&self, terminal_id: &str) -> Option<CommandStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(terminal_id)
            .copied()
    }

    fn forget(&self, terminal_id: &str) -> Option<CommandStatus> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(terminal_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Render terminal output for the agent.
pub fn format_command_output(
    status: CommandStatus,
    output: &str,
    exit: &TerminalExitStatus,
    truncated: bool,
) -> String {
    let finished = exit.exit_code.is_some() || exit.signal.is_some();
    let mut text = String::new();
    match status {
        CommandStatus::Exited if !finished => text.push_str("Interrupted by the user. "),
        CommandStatus::Killed => text.push_str("Killed. "),
        CommandStatus::TimedOut => text.push_str("Timed out. "),
        CommandStatus::Started | CommandStatus::Exited => {}
    }
    if let Some(code) = exit.exit_code {
        let _ = write!(text, "Exited with code {code}.");
    }
    if let Some(signal) = exit.signal.as_deref() {
        let _ = write!(text, "Signal `{signal}`. ");
    }
    text.push_str(if finished { "Final output:\n\n" } else { "New output:\n\n" });
    text.push_str(output);
    if truncated {
        let _ = write!(
            text,
            "\n\nCommand output was too long, so it was truncated to {} bytes.",
            output.len()
        );
    }
    text
}

impl ToolServer {
    fn terminal(&self, terminal_id: &str) -> TerminalRequest {
        TerminalRequest {
            session_id: self.session_id.clone(),
            terminal_id: terminal_id.to_string(),
        }
    }

    /// Wait for the terminal to exit within `timeout`, killing it on expiry,
    /// then collect its output and release it.
    async fn finish_terminal(&self, terminal_id: &str, timeout: Duration) -> String {
        let request = self.terminal(terminal_id);
        let (status, exit) =
            match tokio::time::timeout(timeout, self.client.wait_for_terminal_exit(request.clone())).await {
                Ok(Ok(exit)) => (CommandStatus::Exited, exit),
                Ok(Err(e)) => {
                    warn!(session_id = %self.session_id, terminal_id, error = %e, "wait_for_terminal_exit failed");
                    (CommandStatus::Exited, TerminalExitStatus::default())
                }
                Err(_) => {
                    info!(session_id = %self.session_id, terminal_id, ?timeout, "Command timed out, killing");
                    if let Err(e) = self.client.kill_terminal(request).await {
                        warn!(session_id = %self.session_id, terminal_id, error = %e, "kill_terminal failed");
                    }
                    (CommandStatus::TimedOut, TerminalExitStatus::default())
                }
            };
        self.collect_output(terminal_id, status, &exit).await
    }

    async fn collect_output(&self, terminal_id: &str, status: CommandStatus, exit: &TerminalExitStatus) -> String {
        let request = self.terminal(terminal_id);
        let (output, truncated) = match self.client.terminal_output(request.clone()).await {
            Ok(out) => (out.output, out.truncated),
            Err(e) => {
                warn!(session_id = %self.session_id, terminal_id, error = %e, "terminal_output failed");
                (String::new(), false)
            }
        };
        self.release(terminal_id).await;
        format_command_output(status, &output, exit, truncated)
    }

    async fn release(&self, terminal_id: &str) {
        if let Err(e) = self.client.release_terminal(self.terminal(terminal_id)).await {
            debug!(session_id = %self.session_id, terminal_id, error = %e, "release_terminal failed");
        }
    }

    pub(super) async fn bash(&self, input: &Value) -> ToolOutput {
        let command = input_str(input, "command");
        if command.is_empty() {
            return ToolOutput::error("command is required");
        }
        let timeout_ms = input_u64(input, "timeout").unwrap_or(DEFAULT_TIMEOUT_MS);

        let created = self
            .client
            .create_terminal(CreateTerminalRequest {
                session_id: self.session_id.clone(),
                command: command.to_string(),
                args: Vec::new(),
                env: vec![NameValue {
                    name: "CLAUDECODE".to_string(),
                    value: "1".to_string(),
                }],
                cwd: Some(self.cwd.clone()),
                output_byte_limit: Some(OUTPUT_BYTE_LIMIT),
            })
            .await;
        let terminal_id = match created {
            Ok(resp) => resp.terminal_id,
            Err(e) => return ToolOutput::error(format!("Running bash command failed: {}", e.message)),
        };

        if input_bool(input, "run_in_background") {
            self.terminals.track(&terminal_id);
            info!(session_id = %self.session_id, terminal_id = %terminal_id, "Started background command");
            return ToolOutput::text(format!("Command started in background with id: {terminal_id}"));
        }

        ToolOutput::text(
            self.finish_terminal(&terminal_id, Duration::from_millis(timeout_ms))
                .await,
        )
    }

    pub(super) async fn bash_output(&self, input: &Value) -> ToolOutput {
        let id = match input_str(input, "bash_id") {
            "" => input_str(input, "task_id"),
            id => id,
        };
        if id.is_empty() {
            return ToolOutput::error("bash_id is required");
        }
        let Some(tracked) = self.terminals.status(id) else {
            return ToolOutput::error(format!("Retrieving bash output failed: no background shell with id {id}"));
        };

        if tracked == CommandStatus::Killed {
            self.terminals.forget(id);
            return ToolOutput::text(
                self.collect_output(id, CommandStatus::Killed, &TerminalExitStatus::default())
                    .await,
            );
        }

        if input_bool(input, "block") {
            let timeout_ms = input_u64(input, "timeout").unwrap_or(DEFAULT_TIMEOUT_MS);
            self.terminals.forget(id);
            return ToolOutput::text(self.finish_terminal(id, Duration::from_millis(timeout_ms)).await);
        }

        match self.client.terminal_output(self.terminal(id)).await {
            Ok(out) => match out.exit_status {
                Some(exit) => {
                    self.terminals.forget(id);
                    self.release(id).await;
                    ToolOutput::text(format_command_output(CommandStatus::Exited, &out.output, &exit, out.truncated))
                }
                None => ToolOutput::text(format_command_output(
                    CommandStatus::Started,
                    &out.output,
                    &TerminalExitStatus::default(),
                    out.truncated,
                )),
            },
            Err(e) => ToolOutput::error(format!("Retrieving bash output failed: {}", e.message)),
        }
    }

    /// Kill a background command. Its output stays available to one more
    /// `BashOutput` call, which reports it as killed and releases it.
    pub(super) async fn kill_shell(&self, input: &Value) -> ToolOutput {
        let id = input_str(input, "shell_id");
        if id.is_empty() {
            return ToolOutput::error("shell_id is required");
        }
        if self.terminals.status(id).is_none() {
            return ToolOutput::error(format!("Killing shell failed: no background shell with id {id}"));
        }

        if let Err(e) = self.client.kill_terminal(self.terminal(id)).await {
            return ToolOutput::error(format!("Killing shell failed: {}", e.message));
        }
        self.terminals.mark(id, CommandStatus::Killed);
        info!(session_id = %self.session_id, terminal_id = id, "Killed background command");
        ToolOutput::text("Command killed successfully.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: i64) -> TerminalExitStatus {
        TerminalExitStatus {
            exit_code: Some(code),
            signal: None,
        }
    }

    #[test]
    fn formats_finished_commands() {
        assert_eq!(
            format_command_output(CommandStatus::Exited, "ok\n", &exited(0), false),
            "Exited with code 0.Final output:\n\nok\n"
        );
        let signalled = TerminalExitStatus {
            exit_code: None,
            signal: Some("SIGTERM".into()),
        };
        assert_eq!(
            format_command_output(CommandStatus::Exited, "", &signalled, false),
            "Signal `SIGTERM`. Final output:\n\n"
        );
    }

    #[test]
    fn formats_status_prefixes() {
        let none = TerminalExitStatus::default();
        assert_eq!(
            format_command_output(CommandStatus::TimedOut, "partial", &none, false),
            "Timed out. New output:\n\npartial"
        );
        assert_eq!(
            format_command_output(CommandStatus::Killed, "", &none, false),
            "Killed. New output:\n\n"
        );
        assert_eq!(
            format_command_output(CommandStatus::Exited, "", &none, false),
            "Interrupted by the user. New output:\n\n"
        );
        assert_eq!(
            format_command_output(CommandStatus::Started, "tick", &none, false),
            "New output:\n\ntick"
        );
    }

    #[test]
    fn notes_truncation() {
        let text = format_command_output(CommandStatus::Exited, "abcd", &exited(1), true);
        assert!(text.ends_with("abcd\n\nCommand output was too long, so it was truncated to 4 bytes."));
    }

    #[test]
    fn tracks_background_terminals() {
        let terminals = BackgroundTerminals::new();
        assert!(terminals.is_empty());
        terminals.track("term-1");
        assert_eq!(terminals.status("term-1"), Some(CommandStatus::Started));
        terminals.mark("term-1", CommandStatus::Killed);
        assert_eq!(terminals.status("term-1"), Some(CommandStatus::Killed));
        assert_eq!(terminals.forget("term-1"), Some(CommandStatus::Killed));
        assert!(terminals.status("term-1").is_none());
    }
}
