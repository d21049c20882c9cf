//! In-memory conversation transcript
//!
//! A transcript is the ordered sequence of turns for one conversation. Its
//! first turn is always the single System turn (persona plus memory
//! preamble). Tool turns may interleave between an assistant tool-request
//! and the next assistant content turn, and are excluded from conversation
//! size accounting.

use crate::provider::{ContentPart, Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One role-tagged entry in a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set only on Tool turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn carrying tool-call requests (content may be empty).
    pub fn assistant_tool_request(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: Some(tool_name.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    /// Whether this turn counts toward conversation size.
    pub fn is_conversational(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant)
    }
}

/// Ordered turn sequence for one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Create a transcript seeded with its System turn.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
        }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop everything appended after `len` turns. Used to roll a failed
    /// turn back so no partial mutation survives.
    pub fn truncate(&mut self, len: usize) {
        self.turns.truncate(len);
    }

    /// The System turn's content.
    pub fn system_prompt(&self) -> &str {
        self.turns
            .first()
            .filter(|t| t.role == Role::System)
            .map(|t| t.content.as_str())
            .unwrap_or("")
    }

    /// Number of User and Assistant turns. Tool turns are excluded.
    pub fn conversation_len(&self) -> usize {
        self.turns.iter().filter(|t| t.is_conversational()).count()
    }

    /// Last assistant text content, if any.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant && !t.content.is_empty())
            .map(|t| t.content.as_str())
    }

    /// Bound in-memory growth: when the conversation count exceeds `keep`,
    /// retain the System turn plus the most recent `keep` conversation turns
    /// and the Tool turns interleaved among them. No-op at or below the cap.
    ///
    /// Returns the number of turns dropped.
    pub fn compact(&mut self, keep: usize) -> usize {
        if self.conversation_len() <= keep {
            return 0;
        }
        // Degenerate cap: keep only the System turn.
        if keep == 0 {
            let dropped = self.turns.len().saturating_sub(1);
            self.turns.truncate(1);
            return dropped;
        }

        // Find the index of the keep-th conversation turn counting from the
        // end; everything from there on survives.
        let mut remaining = keep;
        let mut cutoff = self.turns.len();
        for (i, turn) in self.turns.iter().enumerate().rev() {
            if turn.is_conversational() {
                remaining -= 1;
                if remaining == 0 {
                    cutoff = i;
                    break;
                }
            }
        }

        let mut kept: Vec<Turn> = Vec::with_capacity(self.turns.len() - cutoff + 1);
        kept.push(self.turns[0].clone());
        kept.extend(self.turns.drain(cutoff..));
        self.turns = kept;
        cutoff.saturating_sub(1)
    }

    /// Convert to the provider wire shape.
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .map(|turn| {
                let mut content = Vec::new();
                match turn.role {
                    Role::Tool => {
                        content.push(ContentPart::ToolResult {
                            tool_call_id: turn.tool_call_id.clone().unwrap_or_default(),
                            content: turn.content.clone(),
                        });
                    }
                    _ => {
                        if !turn.content.is_empty() || turn.tool_calls.is_empty() {
                            content.push(ContentPart::Text {
                                text: turn.content.clone(),
                            });
                        }
                        for call in &turn.tool_calls {
                            content.push(ContentPart::ToolCall {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            });
                        }
                    }
                }
                Message {
                    role: turn.role,
                    content,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_with_conversation(pairs: usize) -> Transcript {
        let mut t = Transcript::new("persona");
        for i in 0..pairs {
            t.push(Turn::user(format!("question {i}")));
            t.push(Turn::assistant(format!("answer {i}")));
        }
        t
    }

    #[test]
    fn conversation_len_excludes_tool_turns() {
        let mut t = transcript_with_conversation(2);
        t.push(Turn::tool("almanac", "call_1", "宜出行"));
        assert_eq!(t.conversation_len(), 4);
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn compact_is_noop_at_or_below_cap() {
        let mut t = transcript_with_conversation(20);
        let before: Vec<String> = t.turns().iter().map(|x| x.content.clone()).collect();
        assert_eq!(t.compact(40), 0);
        let after: Vec<String> = t.turns().iter().map(|x| x.content.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn compact_keeps_exactly_the_most_recent_turns() {
        // 35 pairs = 70 conversation turns, cap 40.
        let mut t = transcript_with_conversation(35);
        let dropped = t.compact(40);
        assert!(dropped > 0);
        assert_eq!(t.conversation_len(), 40);
        assert_eq!(t.turns()[0].role, Role::System);
        // Oldest surviving conversation turn is "question 15" (turns 0..15
        // pairs dropped), newest is "answer 34".
        assert_eq!(t.turns()[1].content, "question 15");
        assert_eq!(t.turns().last().unwrap().content, "answer 34");
        assert!(!t.turns().iter().any(|x| x.content == "answer 14"));
    }

    #[test]
    fn compact_with_zero_cap_keeps_only_the_system_turn() {
        let mut t = transcript_with_conversation(1);
        let dropped = t.compact(0);
        assert_eq!(dropped, 2);
        assert_eq!(t.len(), 1);
        assert_eq!(t.turns()[0].role, Role::System);
    }

    #[test]
    fn compact_retains_interleaved_tool_turns() {
        let mut t = Transcript::new("persona");
        for i in 0..45 {
            t.push(Turn::user(format!("q{i}")));
            t.push(Turn::assistant_tool_request(
                "",
                vec![ToolCallRequest {
                    id: format!("call_{i}"),
                    name: "websearch".into(),
                    arguments: "{}".into(),
                }],
            ));
            t.push(Turn::tool("websearch", format!("call_{i}"), "results"));
            t.push(Turn::assistant(format!("a{i}")));
        }
        t.compact(40);
        assert_eq!(t.conversation_len(), 40);
        // Tool turns inside the kept window survive, each still preceded by
        // its requesting assistant turn.
        let tool_turns = t.turns().iter().filter(|x| x.role == Role::Tool).count();
        // 40 kept conversation turns span the last 13 complete groups plus
        // the closing assistant turn of the group before them.
        assert_eq!(tool_turns, 13);
        assert_eq!(t.turns()[0].role, Role::System);
    }

    #[test]
    fn to_messages_maps_tool_turns_to_tool_results() {
        let mut t = Transcript::new("persona");
        t.push(Turn::user("今天适合搬家吗"));
        t.push(Turn::assistant_tool_request(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "almanac".into(),
                arguments: "{}".into(),
            }],
        ));
        t.push(Turn::tool("almanac", "call_1", "忌搬家"));
        let messages = t.to_messages();
        assert_eq!(messages.len(), 4);
        assert!(matches!(
            &messages[3].content[0],
            ContentPart::ToolResult { tool_call_id, .. } if tool_call_id == "call_1"
        ));
    }
}
