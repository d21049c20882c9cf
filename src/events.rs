//! Turn event stream
//!
//! A streaming turn emits one ordered sequence of tagged events over a
//! single channel: status, text deltas, tool lifecycle, then a terminal
//! `done` or `error`. The transport layer maps these 1:1 onto its wire
//! protocol (SSE frames, WebSocket messages, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of tool-result previews carried in events and invocation records.
pub const RESULT_PREVIEW_CHARS: usize = 120;

/// One event in a streaming turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Turn accepted and started.
    Status { message: String },
    /// Incremental assistant text.
    Content { delta: String },
    /// A tool invocation is starting.
    ToolCallStart { tool_name: String },
    /// A tool invocation finished.
    ToolCallEnd {
        tool_name: String,
        result_preview: String,
        success: bool,
    },
    /// Terminal: the turn completed.
    Done {
        reply: String,
        tool_invocations: Vec<ToolInvocation>,
    },
    /// Terminal: the turn failed.
    Error { message: String },
}

/// Record of one tool invocation within a turn, surfaced to the caller and
/// optionally persisted as metadata on the resulting assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
    pub result_preview: String,
}

/// Truncate a tool result to preview length on a character boundary.
pub fn preview(result: &str) -> String {
    let mut out = String::new();
    for ch in result.chars().take(RESULT_PREVIEW_CHARS) {
        out.push(ch);
    }
    if result.chars().count() > RESULT_PREVIEW_CHARS {
        out.push_str("...");
    }
    out
}
