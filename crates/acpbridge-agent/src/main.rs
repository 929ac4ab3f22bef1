//! acpbridge
//!
//! Speaks the Agent Client Protocol on stdin/stdout and runs one Claude Code
//! process per session.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use acpbridge_agent::rpc::Connection;
use acpbridge_agent::session::{ManagerConfig, SessionManager};
use acpbridge_core::settings::load_managed_settings;

#[derive(Parser, Debug)]
#[command(name = "acpbridge")]
#[command(version, about = "ACP agent backed by the Claude Code CLI")]
struct Args {
    /// Path to the `claude` CLI binary
    #[arg(long, default_value = "claude", env = "CLAUDE_CODE_EXECUTABLE")]
    claude_path: PathBuf,

    /// Turn cap passed to each agent process
    #[arg(long, default_value_t = 200, env = "ACPBRIDGE_MAX_TURNS")]
    max_turns: u32,

    /// Thinking token budget passed to each agent process
    #[arg(long, env = "MAX_THINKING_TOKENS")]
    max_thinking_tokens: Option<u32>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "ACPBRIDGE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, env = "ACPBRIDGE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("acpbridge_agent={0},acpbridge_core={0}", args.log_level);
    acpbridge_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let managed_env = load_managed_settings().map(|s| s.env).unwrap_or_default();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        claude = %args.claude_path.display(),
        max_turns = args.max_turns,
        managed_env = managed_env.len(),
        "Starting acpbridge"
    );

    let config = ManagerConfig {
        executable: args.claude_path,
        max_turns: args.max_turns,
        max_thinking_tokens: args.max_thinking_tokens,
        env: managed_env,
        ..ManagerConfig::default()
    };

    let connection = Connection::new(tokio::io::stdout());
    let manager = Arc::new(SessionManager::new(connection.clone(), config));
    connection.serve(tokio::io::stdin(), manager.clone()).await?;

    manager.shutdown().await;
    info!("acpbridge stopped");
    Ok(())
}
