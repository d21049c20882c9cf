//! OpenAI-compatible chat-completions gateway
//!
//! Works against any OpenAI-compatible endpoint (OpenAI itself, DashScope
//! compatible mode, etc.) via a configurable base URL. Uses the raw HTTP API
//! so failures can be classified into a typed [`UpstreamError`] with the
//! original status code attached.

use super::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Provider, Role,
    StreamChunk, ToolDefinition,
};
use crate::error::{UpstreamError, UpstreamErrorKind};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    provider_name: String,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("provider_name", &self.provider_name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(api_key: String, base_url: String, provider_name: &str) -> Self {
        tracing::debug!(
            provider = provider_name,
            base_url = %base_url,
            api_key_len = api_key.len(),
            "Creating OpenAI-compatible provider"
        );
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            provider_name: provider_name.to_string(),
        }
    }

    fn convert_messages(messages: &[Message]) -> Vec<Value> {
        let mut result = Vec::new();
        for msg in messages {
            let text = msg
                .content
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");

            match msg.role {
                Role::System => result.push(json!({"role": "system", "content": text})),
                Role::User => result.push(json!({"role": "user", "content": text})),
                Role::Assistant => {
                    let tool_calls: Vec<Value> = msg
                        .content
                        .iter()
                        .filter_map(|p| match p {
                            ContentPart::ToolCall { id, name, arguments } => Some(json!({
                                "id": id,
                                "type": "function",
                                "function": {"name": name, "arguments": arguments},
                            })),
                            _ => None,
                        })
                        .collect();
                    let mut m = json!({"role": "assistant", "content": text});
                    if !tool_calls.is_empty() {
                        m["tool_calls"] = Value::Array(tool_calls);
                    }
                    result.push(m);
                }
                Role::Tool => {
                    for part in &msg.content {
                        if let ContentPart::ToolResult { tool_call_id, content } = part {
                            result.push(json!({
                                "role": "tool",
                                "tool_call_id": tool_call_id,
                                "content": content,
                            }));
                        }
                    }
                }
            }
        }
        result
    }

    fn build_body(request: &CompletionRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::convert_messages(&request.messages),
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t: &ToolDefinition| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            },
                        })
                    })
                    .collect(),
            );
            body["tool_choice"] = json!("auto");
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max) = request.max_tokens {
            body["max_tokens"] = json!(max);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| UpstreamError::transport(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status.as_u16(), &text));
        }
        Ok(response)
    }
}

/// Classify a provider error response into a typed kind.
///
/// This is the single place where wire-level error text is inspected; the
/// engine only ever matches on [`UpstreamErrorKind`].
fn classify_api_error(status: u16, body: &str) -> UpstreamError {
    let message = serde_json::from_str::<ApiErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect());

    // OpenAI-compatible endpoints report a broken tool-call/tool-response
    // pairing as a 400 invalid_request_error whose message names the pairing
    // rule. There is no machine-readable code for it on the wire.
    let lower = message.to_ascii_lowercase();
    let malformed = status == 400
        && ((lower.contains("tool_calls") && lower.contains("must be followed by"))
            || (lower.contains("tool") && lower.contains("must be a response")));

    UpstreamError {
        kind: if malformed {
            UpstreamErrorKind::MalformedToolSequence
        } else {
            UpstreamErrorKind::Provider
        },
        status: Some(status),
        message,
    }
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct StreamEnvelope {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: StreamFunction,
}

#[derive(Deserialize, Default)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        let body = Self::build_body(&request, false);
        tracing::debug!(
            provider = %self.provider_name,
            model = %request.model,
            message_count = request.messages.len(),
            "Sending completion request"
        );

        let response = self.post(&body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| UpstreamError::transport(format!("failed to read body: {e}")))?;
        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            let snippet: String = text.chars().take(200).collect();
            UpstreamError::provider(None, format!("unparseable response: {e}: {snippet}"))
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::provider(None, "response had no choices"))?;

        let mut content = Vec::new();
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                content.push(ContentPart::Text { text });
            }
        }
        let has_tool_calls = !choice.message.tool_calls.is_empty();
        for tc in choice.message.tool_calls {
            content.push(ContentPart::ToolCall {
                id: tc.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                name: tc.function.name,
                arguments: tc.function.arguments,
            });
        }

        let finish_reason = if has_tool_calls {
            FinishReason::ToolCalls
        } else {
            match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                Some("tool_calls") => FinishReason::ToolCalls,
                Some("content_filter") => FinishReason::ContentFilter,
                _ => FinishReason::Stop,
            }
        };

        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content,
            },
            finish_reason,
        })
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<futures::stream::BoxStream<'static, StreamChunk>, UpstreamError> {
        let body = Self::build_body(&request, true);
        tracing::debug!(
            provider = %self.provider_name,
            model = %request.model,
            message_count = request.messages.len(),
            "Starting streaming completion request"
        );

        let response = self.post(&body).await?;
        let mut bytes = response.bytes_stream();
        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(64);

        tokio::spawn(async move {
            let mut buffer = String::new();
            // SSE line reassembly plus per-index tool-call id bookkeeping.
            let mut call_ids: HashMap<usize, String> = HashMap::new();
            while let Some(item) = bytes.next().await {
                let chunk = match item {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(StreamChunk::Error(UpstreamError::transport(format!(
                                "stream read failed: {e}"
                            ))))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(StreamChunk::Done).await;
                        return;
                    }
                    let Ok(envelope) = serde_json::from_str::<StreamEnvelope>(data) else {
                        continue;
                    };
                    let Some(choice) = envelope.choices.into_iter().next() else {
                        continue;
                    };
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            let _ = tx.send(StreamChunk::Text(text)).await;
                        }
                    }
                    for tc in choice.delta.tool_calls {
                        if let Some(name) = tc.function.name {
                            let id = tc.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                            call_ids.insert(tc.index, id.clone());
                            let _ = tx.send(StreamChunk::ToolCallStart { id, name }).await;
                        }
                        if let Some(args) = tc.function.arguments {
                            if !args.is_empty() {
                                let id = call_ids.get(&tc.index).cloned().unwrap_or_default();
                                let _ = tx
                                    .send(StreamChunk::ToolCallDelta {
                                        id,
                                        arguments_delta: args,
                                    })
                                    .await;
                            }
                        }
                    }
                }
            }
            // Stream ended without an explicit [DONE]; treat as complete.
            let _ = tx.send(StreamChunk::Done).await;
        });

        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_tool_sequence_is_classified() {
        let body = r#"{"error":{"message":"Invalid parameter: messages with role 'tool' must be a response to a preceding message with 'tool_calls'.","type":"invalid_request_error"}}"#;
        let err = classify_api_error(400, body);
        assert_eq!(err.kind, UpstreamErrorKind::MalformedToolSequence);
        assert_eq!(err.status, Some(400));
    }

    #[test]
    fn generic_provider_error_keeps_status() {
        let err = classify_api_error(429, r#"{"error":{"message":"rate limited"}}"#);
        assert_eq!(err.kind, UpstreamErrorKind::Provider);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.message, "rate limited");
    }

    #[test]
    fn assistant_tool_calls_round_trip_to_wire_format() {
        let messages = vec![
            Message {
                role: Role::Assistant,
                content: vec![ContentPart::ToolCall {
                    id: "call_1".into(),
                    name: "almanac".into(),
                    arguments: "{}".into(),
                }],
            },
            Message {
                role: Role::Tool,
                content: vec![ContentPart::ToolResult {
                    tool_call_id: "call_1".into(),
                    content: "宜出行".into(),
                }],
            },
        ];
        let wire = OpenAiCompatProvider::convert_messages(&messages);
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }
}
