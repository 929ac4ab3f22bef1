//! Tracing subscriber setup for the bridge binary.
//!
//! Stdout carries the ACP JSON-RPC stream, so every log line goes to stderr.

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `default_filter` when it parses. `log_json` switches
/// the stderr output to one JSON object per event.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true);
    let output = if log_json {
        stderr.json().boxed()
    } else {
        stderr.compact().boxed()
    };

    tracing_subscriber::registry().with(output.with_filter(filter)).init();
}
