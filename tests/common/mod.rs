//! Shared test doubles: a scripted model provider and a controllable tool.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tianji_engine::config::EngineConfig;
use tianji_engine::engine::ChatEngine;
use tianji_engine::error::UpstreamError;
use tianji_engine::provider::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Provider, Role,
    StreamChunk,
};
use tianji_engine::tool::{Tool, ToolRegistry, ToolResult};

/// A provider that replays a script of responses in order. Records every
/// request it receives so tests can assert on the transcript wire shape.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<CompletionResponse, UpstreamError>>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Script a plain-text final answer.
    pub fn reply(self, text: &str) -> Self {
        self.push(Ok(text_response(text)));
        self
    }

    /// Script an assistant turn requesting one tool call.
    pub fn tool_call(self, id: &str, name: &str, arguments: &str) -> Self {
        self.push(Ok(tool_call_response(id, name, arguments)));
        self
    }

    /// Script a gateway failure.
    pub fn error(self, error: UpstreamError) -> Self {
        self.push(Err(error));
        self
    }

    fn push(&self, entry: Result<CompletionResponse, UpstreamError>) {
        self.script.lock().unwrap().push_back(entry);
    }

    fn next(&self, request: CompletionRequest) -> Result<CompletionResponse, UpstreamError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(text_response("（脚本耗尽）")))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, UpstreamError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next(request)
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<BoxStream<'static, StreamChunk>, UpstreamError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next(request)?;
        let mut chunks = Vec::new();
        for part in &response.message.content {
            match part {
                ContentPart::Text { text } => {
                    // Split text into two deltas as a real stream would.
                    let mid = text.chars().count() / 2;
                    let head: String = text.chars().take(mid).collect();
                    let tail: String = text.chars().skip(mid).collect();
                    if !head.is_empty() {
                        chunks.push(StreamChunk::Text(head));
                    }
                    if !tail.is_empty() {
                        chunks.push(StreamChunk::Text(tail));
                    }
                }
                ContentPart::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    chunks.push(StreamChunk::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                    });
                    chunks.push(StreamChunk::ToolCallDelta {
                        id: id.clone(),
                        arguments_delta: arguments.clone(),
                    });
                }
                ContentPart::ToolResult { .. } => {}
            }
        }
        chunks.push(StreamChunk::Done);
        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        message: Message {
            role: Role::Assistant,
            content: vec![ContentPart::Text {
                text: text.to_string(),
            }],
        },
        finish_reason: FinishReason::Stop,
    }
}

pub fn tool_call_response(id: &str, name: &str, arguments: &str) -> CompletionResponse {
    CompletionResponse {
        message: Message {
            role: Role::Assistant,
            content: vec![ContentPart::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            }],
        },
        finish_reason: FinishReason::ToolCalls,
    }
}

/// A tool with controllable latency and failure, recording every argument
/// payload it receives.
pub struct MockTool {
    id: String,
    search: bool,
    delay: Option<Duration>,
    fail: bool,
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockTool {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            search: false,
            delay: None,
            fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn search_class(mut self) -> Self {
        self.search = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<Value>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Tool for MockTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "测试工具"
    }

    fn description(&self) -> &str {
        "测试工具"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } }
        })
    }

    fn search_class(&self) -> bool {
        self.search
    }

    async fn execute(&self, args: Value) -> anyhow::Result<ToolResult> {
        self.calls.lock().unwrap().push(args);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("simulated tool failure");
        }
        Ok(ToolResult::success(format!("{}的结果", self.id)))
    }
}

/// A bare metaphysics-agent turn request with no persisted history.
pub fn turn_request(conversation_id: &str, user_message: &str) -> tianji_engine::TurnRequest {
    tianji_engine::TurnRequest {
        conversation_id: conversation_id.to_string(),
        agent: tianji_engine::AgentKind::Metaphysics,
        user_message: user_message.to_string(),
        persisted_summary: None,
        recent_messages: Vec::new(),
    }
}

pub fn stored(role: tianji_engine::memory::StoredRole, content: &str) -> tianji_engine::memory::StoredMessage {
    tianji_engine::memory::StoredMessage {
        role,
        content: content.to_string(),
        created_at: chrono::Utc::now(),
    }
}

static TRACING: std::sync::Once = std::sync::Once::new();

/// Route engine logs through the test harness so failing tests show them.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

/// Engine over a scripted provider and the given tools, default config.
pub fn engine_with(provider: Arc<MockProvider>, tools: Vec<Arc<dyn Tool>>) -> ChatEngine {
    init_tracing();
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    ChatEngine::new(provider, registry, EngineConfig::default())
}
