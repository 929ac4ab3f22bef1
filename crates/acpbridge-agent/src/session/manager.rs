//! Session registry and the ACP agent methods.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use acpbridge_core::SettingsManager;
use acpbridge_core::ndjson::outbound::set_permission_mode_request;

use super::error::SessionError;
use super::modes::{PermissionMode, available_modes, bypass_allowed};
use super::state::Session;
use crate::acp::{
    AcpError, Agent, AgentCapabilities, AuthMethod, CancelNotification, Client, ClientCapabilities,
    Implementation, InitializeRequest, InitializeResponse, McpCapabilities, NewSessionRequest, NewSessionResponse,
    PROTOCOL_VERSION, PromptCapabilities, PromptRequest, PromptResponse, SessionModeState, SessionNotification,
    SessionUpdate, SetSessionModeRequest, SetSessionModeResponse,
};
use crate::subprocess::config::DEFAULT_MAX_TURNS;
use crate::subprocess::{AgentProcess, SpawnConfig, map_mcp_servers};
use crate::tools::{ToolServer, disallowed_builtin_tools};

const AGENT_NAME: &str = "claude-code-acp";
const AGENT_TITLE: &str = "Claude Code";
const AUTH_METHOD_ID: &str = "claude-login";

/// How agent processes are started.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub executable: PathBuf,
    /// Arguments placed before the agent flags.
    pub program_args: Vec<String>,
    pub max_turns: u32,
    pub max_thinking_tokens: Option<u32>,
    /// Environment applied to every agent process, below per-session settings.
    pub env: HashMap<String, String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("claude"),
            program_args: Vec::new(),
            max_turns: DEFAULT_MAX_TURNS,
            max_thinking_tokens: None,
            env: HashMap::new(),
        }
    }
}

/// Whether a login left a backup config behind without the config itself,
/// which the agent treats as signed out.
fn backup_exists_without_primary() -> bool {
    let Some(home) = dirs::home_dir() else {
        return false;
    };
    home.join(".claude.json.backup").exists() && !home.join(".claude.json").exists()
}

fn auth_method(caps: &ClientCapabilities) -> AuthMethod {
    AuthMethod {
        id: AUTH_METHOD_ID.to_string(),
        name: "Log in with Claude Code".to_string(),
        description: Some("Run `claude /login` in the terminal".to_string()),
        meta: caps.terminal_auth().then(|| {
            json!({
                "terminal-auth": {
                    "command": "claude",
                    "args": ["/login"],
                    "label": "Claude Code Login"
                }
            })
        }),
    }
}

/// Owns every live session and serves the ACP agent methods.
pub struct SessionManager {
    client: Arc<dyn Client>,
    config: ManagerConfig,
    allow_bypass: bool,
    capabilities: StdRwLock<ClientCapabilities>,
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn Client>, config: ManagerConfig) -> Self {
        Self::with_bypass(client, config, bypass_allowed())
    }

    /// Construct with an explicit answer to whether bypass mode is offered.
    pub fn with_bypass(client: Arc<dyn Client>, config: ManagerConfig, allow_bypass: bool) -> Self {
        Self {
            client,
            config,
            allow_bypass,
            capabilities: StdRwLock::new(ClientCapabilities::default()),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn client_capabilities(&self) -> ClientCapabilities {
        self.capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>, SessionError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: session_id.to_string(),
            })
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Stop every agent process and empty the registry.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            debug!(session_id = %session.id(), "Closing session");
            session.process().close().await;
        }
    }

    fn initial_mode(&self, settings: &SettingsManager) -> PermissionMode {
        let merged = settings.settings();
        let mode = match merged.default_mode() {
            None => PermissionMode::Default,
            Some(id) => PermissionMode::parse(id).unwrap_or_else(|| {
                warn!(mode = id, "Ignoring unknown defaultMode");
                PermissionMode::Default
            }),
        };
        if mode == PermissionMode::BypassPermissions && !self.allow_bypass {
            info!("Bypass mode is not available, starting in default mode");
            return PermissionMode::Default;
        }
        mode
    }

    fn spawn_config(
        &self,
        session_id: &str,
        request: &NewSessionRequest,
        mode: PermissionMode,
        settings: &SettingsManager,
        tools: &ToolServer,
        caps: &ClientCapabilities,
    ) -> SpawnConfig {
        let mut env = self.config.env.clone();
        env.extend(settings.settings().env);

        let mut config = SpawnConfig::new(&self.config.executable, &request.cwd, session_id);
        config.program_args.clone_from(&self.config.program_args);
        config.max_turns = self.config.max_turns;
        config.permission_mode = Some(mode.as_str().to_string());
        config.system_prompt = request.system_prompt().map(str::to_string);
        config.max_thinking_tokens = self.config.max_thinking_tokens;
        config.permission_prompt_stdio = true;
        config.disallowed_tools = disallowed_builtin_tools(caps);
        config.mcp_servers = map_mcp_servers(&request.mcp_servers);
        config.internal_server = tools.has_tools();
        config.env = env;
        config
    }
}

#[async_trait]
impl Agent for SessionManager {
    async fn initialize(&self, request: InitializeRequest) -> Result<InitializeResponse, AcpError> {
        let caps = request.client_capabilities;
        info!(
            protocol_version = request.protocol_version,
            read = caps.fs.read_text_file,
            write = caps.fs.write_text_file,
            terminal = caps.terminal,
            "Client initialized"
        );
        let method = auth_method(&caps);
        *self
            .capabilities
            .write()
            .unwrap_or_else(PoisonError::into_inner) = caps;

        Ok(InitializeResponse {
            protocol_version: PROTOCOL_VERSION,
            agent_capabilities: AgentCapabilities {
                load_session: false,
                prompt_capabilities: PromptCapabilities {
                    image: true,
                    audio: false,
                    embedded_context: true,
                },
                mcp_capabilities: McpCapabilities { http: true, sse: true },
            },
            agent_info: Implementation {
                name: AGENT_NAME.to_string(),
                title: Some(AGENT_TITLE.to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            auth_methods: vec![method],
        })
    }

    async fn new_session(&self, request: NewSessionRequest) -> Result<NewSessionResponse, AcpError> {
        if backup_exists_without_primary() {
            warn!("Agent config backup found without a config, authentication required");
            return Err(AcpError::auth_required());
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let settings = Arc::new(SettingsManager::load(&request.cwd));
        let mode = self.initial_mode(&settings);
        let caps = self.client_capabilities();
        let tools = ToolServer::new(Arc::clone(&self.client), &session_id, caps.clone(), Arc::clone(&settings));

        let spawn = self.spawn_config(&session_id, &request, mode, &settings, &tools, &caps);
        let process = AgentProcess::spawn(&spawn).map_err(SessionError::from)?;

        let session = Arc::new(Session::new(
            session_id.clone(),
            Arc::new(process),
            Arc::clone(&self.client),
            settings,
            tools,
            mode,
        ));
        self.sessions.write().await.insert(session_id.clone(), session);
        info!(session_id = %session_id, cwd = %request.cwd, mode = %mode, "Session created");

        Ok(NewSessionResponse {
            session_id,
            modes: Some(SessionModeState {
                current_mode_id: mode.as_str().to_string(),
                available_modes: available_modes(self.allow_bypass),
            }),
        })
    }

    async fn prompt(&self, request: PromptRequest) -> Result<PromptResponse, AcpError> {
        let session = self.session(&request.session_id).await?;
        let stop_reason = session.prompt(&request.prompt).await?;
        info!(session_id = %request.session_id, ?stop_reason, "Turn finished");
        Ok(PromptResponse { stop_reason })
    }

    async fn cancel(&self, notification: CancelNotification) -> Result<(), AcpError> {
        let session = self.session(&notification.session_id).await?;
        info!(session_id = %notification.session_id, "Cancelling session");
        session.cancel().await;
        Ok(())
    }

    async fn set_session_mode(&self, request: SetSessionModeRequest) -> Result<SetSessionModeResponse, AcpError> {
        let session = self.session(&request.session_id).await?;
        let mode = PermissionMode::parse(&request.mode_id)
            .filter(|m| self.allow_bypass || *m != PermissionMode::BypassPermissions)
            .ok_or_else(|| SessionError::InvalidMode {
                mode: request.mode_id.clone(),
            })?;

        session.set_mode(mode);
        info!(session_id = %request.session_id, mode = %mode, "Permission mode changed");

        let change = set_permission_mode_request(&session.next_request_id(), mode.as_str());
        if let Err(e) = session.process().send(&change).await {
            debug!(session_id = %request.session_id, error = %e, "Agent did not take the mode change");
        }
        session
            .forward(vec![SessionNotification {
                session_id: request.session_id,
                update: SessionUpdate::CurrentModeUpdate {
                    current_mode_id: mode.as_str().to_string(),
                },
            }])
            .await;
        Ok(SetSessionModeResponse::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn terminal_auth_adds_meta() {
        let plain = auth_method(&ClientCapabilities::default());
        assert_eq!(plain.id, "claude-login");
        assert!(plain.meta.is_none());

        let caps = ClientCapabilities {
            meta: Some(json!({"terminal-auth": true})),
            ..ClientCapabilities::default()
        };
        let meta = auth_method(&caps).meta.unwrap();
        assert_eq!(meta["terminal-auth"]["args"], json!(["/login"]));
        assert_eq!(meta["terminal-auth"]["label"], "Claude Code Login");
    }
}
