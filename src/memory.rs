//! Memory compaction policy
//!
//! Two independent mechanisms bound a conversation's memory:
//!
//! - an in-process transcript size cap, applied after every turn, that keeps
//!   only the most recent conversation turns once the ceiling is crossed;
//! - a durable summary the external conversation store refreshes
//!   periodically, produced here by a small auxiliary completion and clamped
//!   to a character budget.

use crate::provider::{CompletionRequest, ContentPart, Message, Provider, Role};
use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted message supplied by the external conversation store for
/// rehydration or summarization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: StoredRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoredRole {
    User,
    Assistant,
}

/// Bounds in-memory transcript growth.
#[derive(Debug, Clone, Copy)]
pub struct CompactionPolicy {
    /// Single configured ceiling: trigger above it, keep this many.
    pub max_conversation_turns: usize,
}

impl CompactionPolicy {
    pub fn new(max_conversation_turns: usize) -> Self {
        Self {
            max_conversation_turns,
        }
    }

    /// Apply the size cap. Returns the number of turns dropped.
    pub fn apply(&self, transcript: &mut Transcript) -> usize {
        let dropped = transcript.compact(self.max_conversation_turns);
        if dropped > 0 {
            tracing::debug!(
                dropped,
                remaining = transcript.conversation_len(),
                "Compacted transcript"
            );
        }
        dropped
    }
}

/// Instruction for the durable-summary completion. Concrete facts beat topic
/// description: names, dates, places, numbers, relationships.
const SUMMARY_INSTRUCTION: &str = "你是一个对话记忆压缩器。请将下面的历史对话压缩成一段备忘，\
     要求：不超过{max_chars}字；优先保留人名、出生日期、地点、数字事实和人物关系；\
     其次才是讨论过的话题；使用第三人称陈述，不要加任何前缀或解释。";

/// Build the completion request for a durable-summary refresh.
pub fn summary_request(
    messages: &[StoredMessage],
    max_chars: usize,
    model: &str,
) -> CompletionRequest {
    let history = messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                StoredRole::User => "用户",
                StoredRole::Assistant => "助手",
            };
            format!("{speaker}：{}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    CompletionRequest {
        messages: vec![
            Message {
                role: Role::System,
                content: vec![ContentPart::Text {
                    text: SUMMARY_INSTRUCTION.replace("{max_chars}", &max_chars.to_string()),
                }],
            },
            Message {
                role: Role::User,
                content: vec![ContentPart::Text { text: history }],
            },
        ],
        tools: Vec::new(),
        model: model.to_string(),
        temperature: Some(0.2),
        max_tokens: Some(512),
    }
}

/// Summarize older messages, falling back to a degenerate summary when the
/// gateway fails. Summarization never fails the enclosing turn.
pub async fn summarize(
    provider: &dyn Provider,
    messages: &[StoredMessage],
    max_chars: usize,
    model: &str,
) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let request = summary_request(messages, max_chars, model);
    match provider.complete(request).await {
        Ok(response) => clamp_chars(response.text().trim(), max_chars),
        Err(e) => {
            tracing::warn!(error = %e, message_count = messages.len(), "Summarization failed, using fallback");
            fallback_summary(messages.len())
        }
    }
}

/// Degenerate summary used when the model is unavailable.
pub fn fallback_summary(message_count: usize) -> String {
    format!("此前有{message_count}条历史对话，内容未能自动归纳。")
}

/// Truncate to `max_chars` characters (not bytes; summaries are CJK-heavy).
pub fn clamp_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
