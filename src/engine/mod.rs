//! Chat-session orchestration engine
//!
//! Drives one turn of conversation: acquires the per-session lock, hydrates
//! or reuses the resident transcript, appends the user turn, runs the model
//! with tool round-trips until a final answer, applies compaction, and
//! releases the lock. Turns against the same conversation serialize; turns
//! against different conversations run fully in parallel.

use crate::config::EngineConfig;
use crate::error::{EngineError, UpstreamErrorKind};
use crate::events::{ToolInvocation, TurnEvent, preview};
use crate::guard::{GuardConfig, SearchGuard};
use crate::memory::{self, CompactionPolicy, StoredMessage, StoredRole};
use crate::persona::{AgentKind, persona_prompt};
use crate::provider::{
    CompletionRequest, CompletionResponse, ContentPart, FinishReason, Message, Provider, Role,
    StreamChunk,
};
use crate::session::SessionManager;
use crate::tool::ToolRegistry;
use crate::transcript::{ToolCallRequest, Transcript, Turn};
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One turn request from the transport layer.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    pub agent: AgentKind,
    pub user_message: String,
    /// Long-term memory from the conversation store; read at rehydration.
    pub persisted_summary: Option<String>,
    /// Recent persisted messages, oldest first.
    pub recent_messages: Vec<StoredMessage>,
}

/// Result of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub reply: String,
    pub tool_invocations: Vec<ToolInvocation>,
}

/// The orchestration engine. One instance serves every conversation; inject
/// it rather than reaching for process-wide statics so tests get isolation.
pub struct ChatEngine {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    guard: SearchGuard,
    sessions: SessionManager,
    policy: CompactionPolicy,
    config: EngineConfig,
}

impl ChatEngine {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: EngineConfig) -> Self {
        let guard = SearchGuard::new(GuardConfig {
            max_searches: config.guard.max_searches,
            similarity_threshold: config.guard.similarity_threshold,
            max_query_chars: config.guard.max_query_chars,
        });
        let policy = CompactionPolicy::new(config.session.max_conversation_turns);
        Self {
            provider,
            tools,
            guard,
            sessions: SessionManager::new(),
            policy,
            config,
        }
    }

    /// Build an engine with the configured OpenAI-compatible gateway and the
    /// default tool set.
    pub fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        let api_key = config
            .provider
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no API key configured (set TIANJI_API_KEY)"))?;
        let provider = Arc::new(crate::provider::openai::OpenAiCompatProvider::new(
            api_key,
            config.provider.base_url.clone(),
            "openai-compat",
        ));
        let tools = ToolRegistry::with_defaults(&config.tools);
        Ok(Self::new(provider, tools, config))
    }

    /// Run one blocking turn. Returns the final answer and the tool
    /// invocations performed along the way.
    pub async fn run_turn(&self, req: TurnRequest) -> Result<TurnOutcome, EngineError> {
        self.turn(&req, None).await
    }

    /// Run one streaming turn. The returned channel carries the whole event
    /// taxonomy in order, ending with a terminal `Done` or `Error`; the
    /// session lock is held until after compaction, i.e. for the entire
    /// streaming duration.
    pub fn run_turn_streaming(self: &Arc<Self>, req: TurnRequest) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(64);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            match engine.turn(&req, Some(&tx)).await {
                Ok(outcome) => {
                    let _ = tx
                        .send(TurnEvent::Done {
                            reply: outcome.reply,
                            tool_invocations: outcome.tool_invocations,
                        })
                        .await;
                }
                Err(e) => {
                    let _ = tx
                        .send(TurnEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        rx
    }

    /// Summarize older persisted messages for a durable-summary refresh.
    /// Never fails: gateway errors degrade to a fallback summary.
    pub async fn summarize_history(&self, messages: &[StoredMessage]) -> String {
        memory::summarize(
            self.provider.as_ref(),
            messages,
            self.config.session.summary_max_chars,
            &self.config.provider.model,
        )
        .await
    }

    /// Durable-summary refresh: summarize, then evict the resident session
    /// so the next turn rehydrates with the fresh summary instead of the
    /// stale one. The caller persists the returned summary.
    pub async fn refresh_summary(
        &self,
        conversation_id: &str,
        messages: &[StoredMessage],
    ) -> String {
        let summary = self.summarize_history(messages).await;
        self.sessions.invalidate(conversation_id).await;
        tracing::info!(
            conversation_id,
            summary_chars = summary.chars().count(),
            "Refreshed durable summary and invalidated session"
        );
        summary
    }

    /// Drop the resident transcript for a conversation; the registry entry
    /// and its lock survive so in-flight serialization is unaffected.
    pub async fn invalidate_session(&self, conversation_id: &str) {
        self.sessions.invalidate(conversation_id).await;
    }

    /// Explicit clear: removes the session (transcript and lock resource)
    /// and resets the conversation's search-guard history.
    pub fn clear_session(&self, conversation_id: &str) {
        self.sessions.remove(conversation_id);
        self.guard.clear(conversation_id);
    }

    /// Whether a conversation currently has a resident transcript.
    pub async fn is_resident(&self, conversation_id: &str) -> bool {
        self.sessions.is_resident(conversation_id).await
    }

    async fn turn(
        &self,
        req: &TurnRequest,
        sink: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<TurnOutcome, EngineError> {
        let session = self.sessions.get_or_create(&req.conversation_id);
        // Serialization point: held until compaction finishes. Dropping the
        // turn future (cancellation) drops the guard, so the lock is
        // released on every exit path.
        let mut state = session.lock().await;

        emit(
            sink,
            TurnEvent::Status {
                message: "processing".to_string(),
            },
        )
        .await;

        if state.is_none() {
            *state = Some(self.hydrate(req).await);
        }
        let transcript = state.as_mut().expect("hydrated above");

        let base_len = transcript.len();
        transcript.push(Turn::user(&req.user_message));

        let mut invocations = Vec::new();
        match self.drive(transcript, req, sink, &mut invocations).await {
            Ok(reply) => {
                transcript.push(Turn::assistant(&reply));
                self.policy.apply(transcript);
                Ok(TurnOutcome {
                    reply,
                    tool_invocations: invocations,
                })
            }
            Err(EngineError::Upstream(e)) if e.kind == UpstreamErrorKind::MalformedToolSequence => {
                tracing::warn!(
                    conversation_id = %req.conversation_id,
                    agent = %req.agent,
                    status = ?e.status,
                    "Malformed tool sequence upstream; rebuilding minimal session and retrying once"
                );
                let mut minimal = Transcript::new(persona_prompt(req.agent));
                minimal.push(Turn::user(&req.user_message));
                *state = Some(minimal);
                let transcript = state.as_mut().expect("just rebuilt");

                invocations.clear();
                match self.drive(transcript, req, sink, &mut invocations).await {
                    Ok(reply) => {
                        transcript.push(Turn::assistant(&reply));
                        self.policy.apply(transcript);
                        Ok(TurnOutcome {
                            reply,
                            tool_invocations: invocations,
                        })
                    }
                    Err(retry_err) => {
                        // The minimal rebuild already discarded the resident
                        // transcript; drop it entirely so the next turn
                        // rehydrates from the persisted summary and history.
                        *state = None;
                        self.log_failure(req, &retry_err);
                        Err(retry_err)
                    }
                }
            }
            Err(e) => {
                // No partial commit: a failed turn leaves the transcript as
                // it was before the user turn was appended.
                transcript.truncate(base_len);
                self.log_failure(req, &e);
                Err(e)
            }
        }
    }

    fn log_failure(&self, req: &TurnRequest, error: &EngineError) {
        let user_message: String = req.user_message.chars().take(80).collect();
        tracing::error!(
            conversation_id = %req.conversation_id,
            agent = %req.agent,
            error = %error,
            user_message = %user_message,
            "Turn failed"
        );
    }

    /// Build the transcript for a conversation with no resident session:
    /// persona plus memory preamble, then the last N persisted messages
    /// verbatim. When the store has no summary but there is older history,
    /// a summary is generated on the spot.
    async fn hydrate(&self, req: &TurnRequest) -> Transcript {
        let n = self.config.session.recent_window;
        let split = req.recent_messages.len().saturating_sub(n);
        let (older, recent) = req.recent_messages.split_at(split);

        let preamble = match req
            .persisted_summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
        {
            Some(summary) => summary.to_string(),
            None if !older.is_empty() => {
                memory::summarize(
                    self.provider.as_ref(),
                    older,
                    self.config.session.summary_max_chars,
                    &self.config.provider.model,
                )
                .await
            }
            None => String::new(),
        };

        let persona = persona_prompt(req.agent);
        let system = if preamble.is_empty() {
            persona
        } else {
            format!("{persona}\n\n{preamble}")
        };

        let mut transcript = Transcript::new(system);
        for message in recent {
            transcript.push(match message.role {
                StoredRole::User => Turn::user(&message.content),
                StoredRole::Assistant => Turn::assistant(&message.content),
            });
        }
        tracing::debug!(
            conversation_id = %req.conversation_id,
            agent = %req.agent,
            replayed = recent.len(),
            summarized = older.len(),
            "Hydrated session"
        );
        transcript
    }

    /// Model/tool round-trips until a final answer or the round ceiling.
    async fn drive(
        &self,
        transcript: &mut Transcript,
        req: &TurnRequest,
        sink: Option<&mpsc::Sender<TurnEvent>>,
        invocations: &mut Vec<ToolInvocation>,
    ) -> Result<String, EngineError> {
        let definitions = self.tools.definitions();
        let max_rounds = self.config.session.max_tool_rounds;

        for round in 1..=max_rounds {
            tracing::debug!(
                conversation_id = %req.conversation_id,
                round,
                "Model round starting"
            );
            let request = CompletionRequest {
                messages: transcript.to_messages(),
                tools: definitions.clone(),
                model: self.config.provider.model.clone(),
                temperature: Some(self.config.provider.temperature),
                max_tokens: Some(self.config.provider.max_tokens),
            };

            let response = match sink {
                Some(tx) => self.complete_streaming(request, tx).await?,
                None => self.provider.complete(request).await?,
            };

            let tool_calls = response.tool_calls();
            if tool_calls.is_empty() {
                return Ok(response.text());
            }

            transcript.push(Turn::assistant_tool_request(
                response.text(),
                tool_calls
                    .iter()
                    .map(|(id, name, arguments)| ToolCallRequest {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: arguments.clone(),
                    })
                    .collect(),
            ));

            for (id, name, arguments) in tool_calls {
                emit(
                    sink,
                    TurnEvent::ToolCallStart {
                        tool_name: name.clone(),
                    },
                )
                .await;
                let started_at = Utc::now();
                let (output, success) = self
                    .invoke_tool(&req.conversation_id, &name, &arguments)
                    .await;
                invocations.push(ToolInvocation {
                    tool_name: name.clone(),
                    started_at,
                    result_preview: preview(&output),
                });
                emit(
                    sink,
                    TurnEvent::ToolCallEnd {
                        tool_name: name.clone(),
                        result_preview: preview(&output),
                        success,
                    },
                )
                .await;
                transcript.push(Turn::tool(&name, &id, output));
            }
        }

        Err(EngineError::ToolRoundLimit(max_rounds))
    }

    /// Consume a streaming completion, forwarding text deltas to the sink
    /// and reassembling the response (text plus tool calls).
    async fn complete_streaming(
        &self,
        request: CompletionRequest,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<CompletionResponse, EngineError> {
        let mut stream = self.provider.complete_stream(request).await?;
        let mut text = String::new();
        let mut calls: Vec<ToolCallRequest> = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                StreamChunk::Text(delta) => {
                    text.push_str(&delta);
                    let _ = tx.send(TurnEvent::Content { delta }).await;
                }
                StreamChunk::ToolCallStart { id, name } => calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments: String::new(),
                }),
                StreamChunk::ToolCallDelta {
                    id,
                    arguments_delta,
                } => {
                    if let Some(call) = calls.iter_mut().find(|c| c.id == id) {
                        call.arguments.push_str(&arguments_delta);
                    }
                }
                StreamChunk::Done => break,
                StreamChunk::Error(e) => return Err(EngineError::Upstream(e)),
            }
        }

        let finish_reason = if calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        };
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentPart::Text { text });
        }
        for call in calls {
            content.push(ContentPart::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            });
        }
        Ok(CompletionResponse {
            message: Message {
                role: Role::Assistant,
                content,
            },
            finish_reason,
        })
    }

    /// Invoke one tool. Failures, guard rejections, and unknown names all
    /// become text for the model to react to; they never abort the turn.
    async fn invoke_tool(
        &self,
        conversation_id: &str,
        name: &str,
        arguments: &str,
    ) -> (String, bool) {
        let Some(tool) = self.tools.get(name) else {
            let mut available = self.tools.list().join("、");
            if available.is_empty() {
                available = "(无)".to_string();
            }
            return (format!("未知工具「{name}」，可用工具：{available}"), false);
        };

        if tool.search_class() {
            let query = serde_json::from_str::<serde_json::Value>(arguments)
                .ok()
                .and_then(|v| v.get("query").and_then(|q| q.as_str()).map(str::to_string))
                .unwrap_or_default();
            if let Err(reason) = self.guard.check_and_record(conversation_id, &query) {
                tracing::info!(
                    conversation_id,
                    tool = name,
                    %reason,
                    "Search guard rejected invocation"
                );
                return (reason.model_message(), false);
            }
        }

        tracing::debug!(
            conversation_id,
            tool = name,
            display_name = tool.name(),
            "Invoking tool"
        );
        let args = if arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => return (format!("工具参数解析失败: {e}"), false),
            }
        };

        match tool.execute(args).await {
            Ok(result) => (result.output, result.success),
            Err(e) => {
                tracing::warn!(conversation_id, tool = name, error = %e, "Tool execution failed");
                (format!("工具执行失败: {e}"), false)
            }
        }
    }
}

async fn emit(sink: Option<&mpsc::Sender<TurnEvent>>, event: TurnEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event).await;
    }
}
