//! Errors raised by the core library.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An agent stdout line that is not a usable envelope.
    #[error("Malformed agent line: {0}")]
    NdjsonParse(String),

    /// A settings file exists but could not be used.
    #[error("Invalid settings: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
