//! A running agent process and its NDJSON channel.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use acpbridge_core::ndjson::{Envelope, parse_line};

use super::{SpawnConfig, TransportError};

/// Longest stdout line accepted from the agent.
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Grace period between SIGINT and SIGKILL on close.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one agent process.
///
/// Writes go straight to the child's stdin so a dead pipe surfaces on the
/// sending call; stdout lines are read by a reader task and handed out by
/// [`AgentProcess::recv`].
pub struct AgentProcess {
    session_id: String,
    stdin: Mutex<Option<ChildStdin>>,
    lines: Mutex<mpsc::Receiver<Result<String, TransportError>>>,
    child: Mutex<Option<Child>>,
    done: CancellationToken,
    _mcp_config: Option<NamedTempFile>,
}

impl AgentProcess {
    /// Spawn the agent. Must be called inside a tokio runtime.
    pub fn spawn(config: &SpawnConfig) -> Result<Self, TransportError> {
        let mcp_config = config.write_mcp_config()?;
        let mcp_path = mcp_config
            .as_ref()
            .map(|f| f.path().to_string_lossy().into_owned());

        let working_dir = if config.working_directory.as_os_str().is_empty()
            || !config.working_directory.exists()
        {
            let fallback = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
            warn!(
                requested = %config.working_directory.display(),
                fallback = %fallback.display(),
                "Working directory missing or empty, using fallback"
            );
            fallback
        } else {
            config.working_directory.clone()
        };

        let args = config.args(mcp_path.as_deref());
        let mut cmd = Command::new(&config.executable);
        cmd.current_dir(&working_dir)
            .args(&args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            session_id = %config.session_id,
            executable = %config.executable.display(),
            working_dir = %working_dir.display(),
            mcp_config = ?mcp_path,
            "Spawning agent process"
        );
        let mut child = cmd.spawn().map_err(|e| TransportError::SpawnFailed {
            reason: format!("{}: {e}", config.executable.display()),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::SpawnFailed {
            reason: "Failed to capture stdin".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::SpawnFailed {
            reason: "Failed to capture stdout".to_string(),
        })?;

        let (lines_tx, lines_rx) = mpsc::channel(256);
        let sid = config.session_id.clone();
        tokio::spawn(async move {
            let mut frames =
                FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
            while let Some(frame) = frames.next().await {
                let item = match frame {
                    Ok(line) => Ok(line),
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        warn!(session_id = %sid, max = MAX_LINE_BYTES, "Dropping oversized stdout line");
                        Err(TransportError::LineTooLong { max: MAX_LINE_BYTES })
                    }
                    Err(LinesCodecError::Io(e)) => {
                        let _ = lines_tx.send(Err(TransportError::Io(e))).await;
                        break;
                    }
                };
                if lines_tx.send(item).await.is_err() {
                    break;
                }
            }
            info!(session_id = %sid, "stdout reader finished");
        });

        if let Some(stderr) = child.stderr.take() {
            let sid = config.session_id.clone();
            tokio::spawn(async move {
                let mut frames = FramedRead::new(stderr, LinesCodec::new());
                while let Some(Ok(line)) = frames.next().await {
                    warn!(session_id = %sid, "agent stderr: {}", line);
                }
                debug!(session_id = %sid, "stderr reader finished");
            });
        }

        Ok(Self {
            session_id: config.session_id.clone(),
            stdin: Mutex::new(Some(stdin)),
            lines: Mutex::new(lines_rx),
            child: Mutex::new(Some(child)),
            done: CancellationToken::new(),
            _mcp_config: mcp_config,
        })
    }

    /// Serialize `message` as one line on the agent's stdin.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), TransportError> {
        let line = serde_json::to_string(message).map_err(|e| TransportError::WriteFailed {
            reason: e.to_string(),
        })?;
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Closed)?;
        if let Err(e) = write_line(stdin, &line).await {
            error!(session_id = %self.session_id, error = %e, "Failed to write to agent stdin");
            return Err(TransportError::WriteFailed { reason: e.to_string() });
        }
        Ok(())
    }

    /// Next decoded line; `Ok(None)` once stdout has closed.
    ///
    /// Blank lines are skipped. A line that is not a JSON envelope is an error.
    pub async fn recv(&self) -> Result<Option<Envelope>, TransportError> {
        let mut lines = self.lines.lock().await;
        loop {
            match lines.recv().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(e),
                Some(Ok(line)) if line.trim().is_empty() => {}
                Some(Ok(line)) => {
                    return parse_line(&line).map(Some).map_err(|e| {
                        warn!(session_id = %self.session_id, error = %e, line_len = line.len(), "Unparsable agent output");
                        TransportError::Malformed(e)
                    });
                }
            }
        }
    }

    /// Close stdin, stop the process and wake everything waiting on [`Self::closed`].
    ///
    /// The process gets SIGINT first and SIGKILL if it is still running after
    /// the grace period. Safe to call more than once.
    pub async fn close(&self) {
        // A send stuck on a full pipe holds the lock; it fails once the child is gone.
        if let Ok(mut stdin) = self.stdin.try_lock() {
            stdin.take();
        }

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            debug!(session_id = %self.session_id, "Terminating agent process");

            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid comes from our own Child handle, which has not been reaped yet.
                    #[allow(unsafe_code)]
                    #[allow(clippy::cast_possible_wrap)]
                    let ret = unsafe { libc::kill(pid as i32, libc::SIGINT) };
                    if ret != 0 {
                        let err = std::io::Error::last_os_error();
                        warn!(session_id = %self.session_id, pid, error = %err, "Failed to send SIGINT");
                    }
                }
            }

            match tokio::time::timeout(TERMINATE_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(session_id = %self.session_id, ?status, "Agent process exited");
                }
                Ok(Err(e)) => {
                    warn!(session_id = %self.session_id, error = %e, "Error waiting for agent process");
                    child.kill().await.ok();
                }
                Err(_) => {
                    warn!(session_id = %self.session_id, "Timeout waiting for agent exit, killing");
                    child.kill().await.ok();
                }
            }
        }

        self.stdin.lock().await.take();
        self.done.cancel();
    }

    /// Resolves once [`Self::close`] has finished.
    pub async fn closed(&self) {
        self.done.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use acpbridge_core::ndjson::Message;
    use serde_json::json;

    fn script_config(dir: &tempfile::TempDir, body: &str) -> SpawnConfig {
        let script = dir.path().join("agent.sh");
        std::fs::write(&script, body).unwrap();
        let mut config = SpawnConfig::new("sh", dir.path(), "sess-test");
        config.program_args = vec![script.to_string_lossy().into_owned()];
        config
    }

    #[tokio::test]
    async fn reads_lines_until_eof() {
        let dir = tempfile::tempdir().unwrap();
        let config = script_config(
            &dir,
            "echo '{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"x\"}'\necho ''\necho '{\"type\":\"result\",\"subtype\":\"success\"}'\n",
        );
        let process = AgentProcess::spawn(&config).unwrap();

        let first = process.recv().await.unwrap().expect("first line");
        assert!(matches!(first.message, Message::System(_)));
        let second = process.recv().await.unwrap().expect("second line");
        assert!(matches!(second.message, Message::Result(_)));
        assert!(process.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn echoes_what_is_sent() {
        let dir = tempfile::tempdir().unwrap();
        let config = script_config(&dir, "read line\necho \"$line\"\n");
        let process = AgentProcess::spawn(&config).unwrap();

        process
            .send(&json!({"type": "user", "message": {"role": "user", "content": "hi"}}))
            .await
            .unwrap();
        let env = process.recv().await.unwrap().expect("echoed line");
        assert_eq!(env.msg_type(), "user");
        assert!(env.raw.contains("\"content\":\"hi\""));
    }

    #[tokio::test]
    async fn malformed_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = script_config(&dir, "echo 'not json'\n");
        let process = AgentProcess::spawn(&config).unwrap();
        assert!(matches!(process.recv().await, Err(TransportError::Malformed(_))));
    }

    #[tokio::test]
    async fn close_unblocks_reader_and_signals_done() {
        let dir = tempfile::tempdir().unwrap();
        let config = script_config(&dir, "exec sleep 30\n");
        let process = std::sync::Arc::new(AgentProcess::spawn(&config).unwrap());

        let reader = {
            let process = process.clone();
            tokio::spawn(async move { process.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!process.is_closed());

        process.close().await;
        assert!(process.is_closed());
        process.closed().await;

        let read = tokio::time::timeout(Duration::from_secs(10), reader)
            .await
            .expect("reader unblocked")
            .unwrap();
        assert!(matches!(read, Ok(None)));
        assert!(matches!(process.send(&json!({})).await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn send_to_exited_agent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = script_config(&dir, "exit 0\n");
        let process = AgentProcess::spawn(&config).unwrap();

        assert!(process.recv().await.unwrap().is_none());
        let sent = process.send(&json!({"type": "user"})).await;
        assert!(matches!(sent, Err(TransportError::WriteFailed { .. })), "{sent:?}");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let config = SpawnConfig::new("/nonexistent/claude-binary", "/", "sess-x");
        match AgentProcess::spawn(&config) {
            Err(TransportError::SpawnFailed { reason }) => assert!(reason.contains("claude-binary")),
            Err(other) => panic!("Expected SpawnFailed, got {other:?}"),
            Ok(_) => panic!("Expected SpawnFailed, got a process"),
        }
    }
}
