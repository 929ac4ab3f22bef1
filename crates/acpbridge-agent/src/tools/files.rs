//! `Read`, `Write` and `Edit` over the client's file system.
//!
//! Paths inside the agent's own config directory are served from local disk
//! so the agent can keep its bookkeeping files out of the editor.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use acpbridge_core::diff::create_unified_diff;
use acpbridge_core::settings::claude_config_dir;
use acpbridge_core::text::extract_lines_with_byte_limit;

use super::{ToolOutput, ToolServer};
use crate::acp::{AcpError, ReadTextFileRequest, WriteTextFileRequest};
use crate::translate::{SYSTEM_REMINDER, input_bool, input_str, input_u64};

/// Most bytes of file content returned by one `Read`.
pub const MAX_READ_BYTES: usize = 50_000;

/// Why an edit could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("The provided `old_string` is empty.\n\nNo edits were applied.")]
    EmptyOldString,

    #[error("The provided `old_string` does not appear in the file: {old:?}.\n\nNo edits were applied.")]
    NotFound { old: String },
}

/// Replace the first occurrence of `old` (or every one, with `replace_all`).
pub fn apply_edit(content: &str, old: &str, new: &str, replace_all: bool) -> Result<String, EditError> {
    if old.is_empty() {
        return Err(EditError::EmptyOldString);
    }
    if !content.contains(old) {
        return Err(EditError::NotFound { old: old.to_string() });
    }
    Ok(if replace_all {
        content.replace(old, new)
    } else {
        content.replacen(old, new, 1)
    })
}

/// Whether `path` is one of the agent's own files, read and written locally.
///
/// `settings.json` and `session-env` are excluded so that edits to them go
/// through the client like any other file.
pub fn is_internal_path(path: &str) -> bool {
    is_internal_to(path, &claude_config_dir())
}

fn is_internal_to(path: &str, config_dir: &Path) -> bool {
    let path = Path::new(path);
    path.starts_with(config_dir)
        && !["settings.json", "session-env"]
            .iter()
            .any(|name| path.starts_with(config_dir.join(name)))
}

/// Lines `offset..offset+limit` (1-based) of `content`.
fn slice_lines(content: &str, offset: Option<u64>, limit: Option<u64>) -> String {
    if offset.is_none() && limit.is_none() {
        return content.to_string();
    }
    let lines: Vec<&str> = content.split('\n').collect();
    let start = offset.map_or(0, |o| usize::try_from(o.saturating_sub(1)).unwrap_or(usize::MAX)).min(lines.len());
    let end = limit.map_or(lines.len(), |l| {
        start.saturating_add(usize::try_from(l).unwrap_or(usize::MAX))
    });
    lines[start..end.min(lines.len())].join("\n")
}

impl ToolServer {
    async fn read_client_file(&self, path: &str, line: Option<u64>, limit: Option<u64>) -> Result<String, String> {
        self.client
            .read_text_file(ReadTextFileRequest {
                session_id: self.session_id.clone(),
                path: path.to_string(),
                line,
                limit,
            })
            .await
            .map(|resp| resp.content)
            .map_err(|e: AcpError| e.message)
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), String> {
        if is_internal_path(path) {
            if let Some(parent) = Path::new(path).parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
            }
            return tokio::fs::write(path, content).await.map_err(|e| e.to_string());
        }
        self.client
            .write_text_file(WriteTextFileRequest {
                session_id: self.session_id.clone(),
                path: path.to_string(),
                content: content.to_string(),
            })
            .await
            .map_err(|e| e.message)
    }

    pub(super) async fn read(&self, input: &Value) -> ToolOutput {
        let path = input_str(input, "file_path");
        if path.is_empty() {
            return ToolOutput::error("file_path is required");
        }
        let offset = input_u64(input, "offset");
        let limit = input_u64(input, "limit");

        let raw = if is_internal_path(path) {
            debug!(session_id = %self.session_id, path, "Reading internal file from disk");
            tokio::fs::read_to_string(path)
                .await
                .map(|content| slice_lines(&content, offset, limit))
                .map_err(|e| e.to_string())
        } else {
            self.read_client_file(path, offset.filter(|o| *o > 0), limit).await
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => return ToolOutput::error(format!("Reading file failed: {e}")),
        };

        let extracted = extract_lines_with_byte_limit(&raw, MAX_READ_BYTES);
        let mut text = extracted.content;
        if extracted.was_limited {
            text.push_str(&format!(
                "\n\n<file-read-info>Read {n} lines (hit 50KB limit). Continue with offset={n}.</file-read-info>",
                n = extracted.lines_read
            ));
        } else if let Some(offset) = offset.filter(|o| *o > 1) {
            text.push_str(&format!(
                "\n\n<file-read-info>Read lines {offset}-{}.</file-read-info>",
                offset + extracted.lines_read as u64
            ));
        }
        text.push_str(SYSTEM_REMINDER);
        ToolOutput::text(text)
    }

    pub(super) async fn write(&self, input: &Value) -> ToolOutput {
        let path = input_str(input, "file_path");
        if path.is_empty() {
            return ToolOutput::error("file_path is required");
        }
        match self.write_file(path, input_str(input, "content")).await {
            Ok(()) => ToolOutput::text(format!("The file {path} has been updated successfully.")),
            Err(e) => ToolOutput::error(format!("Writing file failed: {e}")),
        }
    }

    /// Apply the edit and return the change as a unified diff.
    pub(super) async fn edit(&self, input: &Value) -> ToolOutput {
        let path = input_str(input, "file_path");
        if path.is_empty() {
            return ToolOutput::error("file_path is required");
        }

        let current = if is_internal_path(path) {
            tokio::fs::read_to_string(path).await.map_err(|e| e.to_string())
        } else {
            self.read_client_file(path, None, None).await
        };
        let current = match current {
            Ok(c) => c,
            Err(e) => return ToolOutput::error(format!("Editing file failed: {e}")),
        };

        let updated = match apply_edit(
            &current,
            input_str(input, "old_string"),
            input_str(input, "new_string"),
            input_bool(input, "replace_all"),
        ) {
            Ok(u) => u,
            Err(e) => return ToolOutput::error(format!("Editing file failed: {e}")),
        };

        let patch = create_unified_diff(path, &current, &updated);
        if let Err(e) = self.write_file(path, &updated).await {
            return ToolOutput::error(format!("Editing file failed: {e}"));
        }
        ToolOutput::text(patch)
    }
}
