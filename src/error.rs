//! Engine error taxonomy
//!
//! Failures are carried as structured values rather than matched by message
//! text: the orchestration engine selects its recovery behavior from
//! [`UpstreamErrorKind`], never from substrings.

use thiserror::Error;

/// Errors surfaced by the orchestration engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A tool invocation failed. Normally converted to Tool-turn text and
    /// never propagated; this variant exists for callers that invoke tools
    /// directly.
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// The search guard denied a tool invocation.
    #[error("search guard rejected query: {0}")]
    GuardRejected(GuardReason),

    /// The model gateway failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Summarization could not produce a usable summary.
    #[error("summarization failed: {0}")]
    Summarization(String),

    /// The per-turn tool-round ceiling was exceeded.
    #[error("exceeded {0} tool rounds in a single turn")]
    ToolRoundLimit(usize),
}

/// A model-gateway failure, classified once at the gateway boundary.
#[derive(Error, Debug, Clone)]
#[error("upstream error ({kind:?}, status {status:?}): {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    /// Transport-level failure (connect, timeout, body read).
    Transport,
    /// The provider returned an error response.
    Provider,
    /// The provider rejected the transcript because an assistant tool-call
    /// turn was not followed by matching tool responses. The engine recovers
    /// from this by rebuilding a minimal session and retrying once.
    MalformedToolSequence,
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Transport,
            status: None,
            message: message.into(),
        }
    }

    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::Provider,
            status,
            message: message.into(),
        }
    }

    pub fn malformed_tool_sequence(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: UpstreamErrorKind::MalformedToolSequence,
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        Self {
            kind: UpstreamErrorKind::Transport,
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Why the search guard denied a query.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardReason {
    /// The per-session invocation cap was already reached.
    CapReached { limit: usize },
    /// The query is a near-duplicate of an earlier one in this conversation.
    NearDuplicate { similarity: f64 },
    /// The raw query is too long to be a concise search term.
    QueryTooLong { chars: usize, max: usize },
}

impl GuardReason {
    /// Model-facing explanation, appended as Tool-turn content so the model
    /// can answer from existing context instead of retrying the search.
    pub fn model_message(&self) -> String {
        match self {
            GuardReason::CapReached { limit } => format!(
                "本次会话的联网搜索次数已达上限（{limit}次），请基于已有信息回答用户。"
            ),
            GuardReason::NearDuplicate { .. } => {
                "该搜索词与之前的搜索高度重复，请直接使用之前的搜索结果回答，不要重复搜索。"
                    .to_string()
            }
            GuardReason::QueryTooLong { max, .. } => format!(
                "搜索词过长（超过{max}个字符），请换用更简短的关键词，或直接回答用户。"
            ),
        }
    }
}

impl std::fmt::Display for GuardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardReason::CapReached { limit } => write!(f, "search cap reached ({limit})"),
            GuardReason::NearDuplicate { similarity } => {
                write!(f, "near-duplicate query (similarity {similarity:.2})")
            }
            GuardReason::QueryTooLong { chars, max } => {
                write!(f, "query too long ({chars} chars, max {max})")
            }
        }
    }
}
