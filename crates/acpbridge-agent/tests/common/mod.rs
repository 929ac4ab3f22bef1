//! Shared fixtures: an in-memory ACP client and scripted fake agents.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use acpbridge_agent::acp::{
    AcpError, Agent, Client, ClientCapabilities, CreateTerminalRequest, CreateTerminalResponse,
    FileSystemCapability, InitializeRequest, NewSessionRequest, ReadTextFileRequest, ReadTextFileResponse,
    RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse, SessionNotification,
    SessionUpdate, TerminalExitStatus, TerminalOutputResponse, TerminalRequest, WriteTextFileRequest,
};
use acpbridge_agent::session::{ManagerConfig, SessionManager};
use acpbridge_core::settings::SettingsPaths;
use acpbridge_core::SettingsManager;

/// Records everything the bridge sends and answers from canned state.
#[derive(Default)]
pub struct MockClient {
    pub updates: Mutex<Vec<SessionNotification>>,
    pub permission_requests: Mutex<Vec<RequestPermissionRequest>>,
    /// Option id picked for permission prompts; `None` cancels.
    pub permission_answer: Mutex<Option<String>>,
    pub files: Mutex<HashMap<String, String>>,
    pub terminal_calls: Mutex<Vec<String>>,
    pub terminal_output: Mutex<String>,
    pub terminal_exit: Mutex<Option<TerminalExitStatus>>,
    /// Make `wait_for_terminal_exit` never return.
    pub hang_terminals: Mutex<bool>,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer_permissions_with(&self, option_id: Option<&str>) {
        *self.permission_answer.lock().unwrap() = option_id.map(str::to_string);
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files.lock().unwrap().insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn updates(&self) -> Vec<SessionUpdate> {
        self.updates.lock().unwrap().iter().map(|n| n.update.clone()).collect()
    }

    pub fn permission_request_count(&self) -> usize {
        self.permission_requests.lock().unwrap().len()
    }

    pub fn terminal_calls(&self) -> Vec<String> {
        self.terminal_calls.lock().unwrap().clone()
    }

    fn record_terminal(&self, call: &str, terminal_id: &str) {
        self.terminal_calls
            .lock()
            .unwrap()
            .push(format!("{call} {terminal_id}"));
    }
}

#[async_trait]
impl Client for MockClient {
    async fn session_update(&self, notification: SessionNotification) -> Result<(), AcpError> {
        self.updates.lock().unwrap().push(notification);
        Ok(())
    }

    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse, AcpError> {
        self.permission_requests.lock().unwrap().push(request);
        let outcome = match self.permission_answer.lock().unwrap().clone() {
            Some(option_id) => RequestPermissionOutcome::Selected { option_id },
            None => RequestPermissionOutcome::Cancelled,
        };
        Ok(RequestPermissionResponse { outcome })
    }

    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<ReadTextFileResponse, AcpError> {
        self.file(&request.path)
            .map(|content| ReadTextFileResponse { content })
            .ok_or_else(|| AcpError::internal_error(format!("No such file: {}", request.path)))
    }

    async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<(), AcpError> {
        self.put_file(&request.path, &request.content);
        Ok(())
    }

    async fn create_terminal(
        &self,
        request: CreateTerminalRequest,
    ) -> Result<CreateTerminalResponse, AcpError> {
        let mut calls = self.terminal_calls.lock().unwrap();
        let terminal_id = format!("term-{}", calls.iter().filter(|c| c.starts_with("create")).count() + 1);
        calls.push(format!("create {}", request.command));
        Ok(CreateTerminalResponse { terminal_id })
    }

    async fn terminal_output(&self, request: TerminalRequest) -> Result<TerminalOutputResponse, AcpError> {
        self.record_terminal("output", &request.terminal_id);
        Ok(TerminalOutputResponse {
            output: self.terminal_output.lock().unwrap().clone(),
            truncated: false,
            exit_status: self.terminal_exit.lock().unwrap().clone(),
        })
    }

    async fn wait_for_terminal_exit(&self, request: TerminalRequest) -> Result<TerminalExitStatus, AcpError> {
        self.record_terminal("wait", &request.terminal_id);
        let hang = *self.hang_terminals.lock().unwrap();
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(TerminalExitStatus {
            exit_code: Some(0),
            signal: None,
        })
    }

    async fn kill_terminal(&self, request: TerminalRequest) -> Result<(), AcpError> {
        self.record_terminal("kill", &request.terminal_id);
        Ok(())
    }

    async fn release_terminal(&self, request: TerminalRequest) -> Result<(), AcpError> {
        self.record_terminal("release", &request.terminal_id);
        Ok(())
    }
}

pub fn full_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        fs: FileSystemCapability {
            read_text_file: true,
            write_text_file: true,
        },
        terminal: true,
        meta: None,
    }
}

/// Settings read only from files under `dir`.
pub fn isolated_settings(dir: &Path) -> Arc<SettingsManager> {
    let paths = SettingsPaths {
        user: dir.join("user-settings.json"),
        project: dir.join(".claude").join("settings.json"),
        local: dir.join(".claude").join("settings.local.json"),
        managed: dir.join("managed-settings.json"),
    };
    Arc::new(SettingsManager::load_from(dir, paths))
}

pub fn write_project_settings(dir: &Path, json: &str) {
    let claude = dir.join(".claude");
    std::fs::create_dir_all(&claude).unwrap();
    std::fs::write(claude.join("settings.json"), json).unwrap();
}

/// Manager whose agent is `sh` running `script` in the session's cwd.
pub fn scripted_manager(client: Arc<MockClient>, dir: &Path, script: &str) -> SessionManager {
    let path = dir.join("agent.sh");
    std::fs::write(&path, script).unwrap();
    let config = ManagerConfig {
        executable: "sh".into(),
        program_args: vec![path.to_string_lossy().into_owned()],
        ..ManagerConfig::default()
    };
    SessionManager::with_bypass(client, config, true)
}

pub async fn open_session(manager: &SessionManager, dir: &Path, caps: ClientCapabilities) -> String {
    manager
        .initialize(InitializeRequest {
            protocol_version: 1,
            client_capabilities: caps,
        })
        .await
        .unwrap();
    manager
        .new_session(NewSessionRequest {
            cwd: dir.to_string_lossy().into_owned(),
            mcp_servers: Vec::new(),
            meta: None,
        })
        .await
        .unwrap()
        .session_id
}

/// A line the fake agent saved from its stdin.
pub fn saved_reply(dir: &Path, name: &str) -> Value {
    let text = std::fs::read_to_string(dir.join(name)).expect("agent saved its input");
    serde_json::from_str(text.trim()).unwrap()
}
