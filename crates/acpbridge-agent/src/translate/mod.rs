//! Translation between the agent's stream-json content and ACP.
//!
//! Everything here is synchronous and side-effect free apart from the
//! [`ToolUseCache`] passed in by the session.

mod notifications;
mod prompt;
mod tool_info;
mod tool_update;

pub use notifications::{
    Role, ToolUseCache, ToolUseEntry, plan_entries, stream_event_notifications, text_notification,
    to_acp_notifications,
};
pub use prompt::{format_uri_as_link, normalize_mcp_slash_command, prompt_to_content};
pub use tool_info::{ToolInfo, tool_info_from_tool_use};
pub use tool_update::{
    SYSTEM_REMINDER, ToolUpdate, to_acp_content_block, to_acp_content_update, tool_update_from_tool_result,
};
pub(crate) use tool_info::{input_bool, input_str, input_u64};
