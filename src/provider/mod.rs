//! Model gateway abstraction
//!
//! One trait over chat-completion providers: a structured transcript plus the
//! available tool capabilities go in, either a final answer or a tool-call
//! request comes out. Tool choice is always left to the model ("automatic");
//! the engine never pre-selects tools.

pub mod openai;

use crate::error::UpstreamError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A message in a conversation, in the shape providers consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ToolCall { id: String, name: String, arguments: String },
    ToolResult { tool_call_id: String, content: String },
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the parameters.
    pub parameters: serde_json::Value,
}

/// Request to generate a completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// A streaming chunk from the model.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    Text(String),
    ToolCallStart { id: String, name: String },
    ToolCallDelta { id: String, arguments_delta: String },
    Done,
    Error(UpstreamError),
}

/// Response from a completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl CompletionResponse {
    /// All requested tool calls, in order: (id, name, arguments).
    pub fn tool_calls(&self) -> Vec<(String, String, String)> {
        self.message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolCall { id, name, arguments } => {
                    Some((id.clone(), name.clone(), arguments.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Concatenated text content.
    pub fn text(&self) -> String {
        self.message
            .content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Chat-completion provider behind the engine.
///
/// Failures surface as [`UpstreamError`] with the classification already
/// applied, so callers never inspect message text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, for logging.
    fn name(&self) -> &str;

    /// Generate a completion.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError>;

    /// Generate a streaming completion.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<futures::stream::BoxStream<'static, StreamChunk>, UpstreamError>;
}
