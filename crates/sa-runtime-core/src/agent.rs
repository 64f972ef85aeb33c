//! Agent Loop (C9, §4.9): the per-chat turn engine tying together the
//! message bus, provider, deterministic tool runtime, recovery manager and
//! storage backend.
//!
//! Grounded on `clawlet/agent/loop.py::AgentLoop` (history trimming,
//! tool-call extraction precedence, per-turn control flow), extended with
//! native-tool-call precedence ahead of the original's regex-only
//! extraction, a character-budget trim pass alongside the original's
//! message-count bound, typed failure classification via `sa-runtime-policy`
//! in place of the original's ad hoc string checks, and the autonomous
//! follow-up mechanism (no direct original-source analog).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use sa_runtime_domain::config::AgentLimits;
use sa_runtime_domain::event::EventType;
use sa_runtime_domain::failure::FailureInfo;
use sa_runtime_domain::tool::{Message, ToolDefinition};
use sa_runtime_policy::classify_error_text;
use sa_runtime_policy::mode::PolicyEngine;
use sa_runtime_store::{RecoveryManager, RunCheckpoint, StorageBackend};

use crate::bus::{InboundMessage, MessageBus, OutboundMessage};
use crate::error::{Result, RuntimeError};
use crate::extract::{extract_tool_calls, is_autonomous_commitment, should_arm_tools};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider};
use crate::runtime::{build_envelope, DeterministicToolRuntime};

/// Resolves the system prompt offered to the provider each turn.
/// Identity-file parsing is an out-of-scope external collaborator; the
/// agent loop only ever consumes an already-resolved string.
pub trait IdentityProvider: Send + Sync {
    fn system_prompt(&self) -> String;
}

/// A fixed system prompt, useful for tests and single-identity deployments.
pub struct StaticIdentity(pub String);

impl IdentityProvider for StaticIdentity {
    fn system_prompt(&self) -> String {
        self.0.clone()
    }
}

struct ConversationState {
    session_id: String,
    history: Vec<Message>,
}

/// One instance serves every chat: a `(channel, chat_id) -> state` map with
/// a per-chat lock serializes turns within a chat while different chats
/// interleave freely (§4.9, §5).
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn LlmProvider>,
    provider_model: Option<String>,
    tool_runtime: Arc<DeterministicToolRuntime>,
    storage: Arc<dyn StorageBackend>,
    recovery: Arc<RecoveryManager>,
    policy: Arc<PolicyEngine>,
    identity: Arc<dyn IdentityProvider>,
    limits: AgentLimits,
    workspace_path: String,
    conversations: AsyncMutex<HashMap<(String, String), Arc<AsyncMutex<ConversationState>>>>,
}

impl AgentLoop {
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn LlmProvider>,
        provider_model: Option<String>,
        tool_runtime: Arc<DeterministicToolRuntime>,
        storage: Arc<dyn StorageBackend>,
        recovery: Arc<RecoveryManager>,
        policy: Arc<PolicyEngine>,
        identity: Arc<dyn IdentityProvider>,
        limits: AgentLimits,
        workspace_path: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            provider,
            provider_model,
            tool_runtime,
            storage,
            recovery,
            policy,
            identity,
            limits,
            workspace_path: workspace_path.into(),
            conversations: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Consume inbound messages until `cancel` fires, processing each turn
    /// on its own task so distinct chats interleave (§4.9).
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let Some(msg) = self.bus.consume_inbound(&cancel).await else {
                break;
            };
            let agent = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = agent.process_message(msg, cancel).await {
                    tracing::error!(error = %err, "agent loop turn failed");
                }
            });
        }
    }

    async fn conversation_for(&self, channel: &str, chat_id: &str) -> Arc<AsyncMutex<ConversationState>> {
        let mut map = self.conversations.lock().await;
        map.entry((channel.to_string(), chat_id.to_string()))
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(ConversationState {
                    session_id: derive_session_id(channel, chat_id),
                    history: Vec::new(),
                }))
            })
            .clone()
    }

    /// Run one turn to completion: received -> iterate (provider call, tool
    /// dispatch) -> completed, with a checkpoint at each stage (§4.9 step 2).
    async fn process_message(&self, msg: InboundMessage, cancel: CancellationToken) -> Result<()> {
        let conv = self.conversation_for(&msg.channel, &msg.chat_id).await;
        let mut state = conv.lock().await;

        let run_id = uuid::Uuid::new_v4().to_string();
        let session_id = state.session_id.clone();
        let model = self.provider_model.clone().unwrap_or_else(|| "default".into());

        let resume_from = msg.metadata.get("recovery_run_id").and_then(Value::as_str);
        self.append_event(
            &run_id,
            &session_id,
            EventType::RunStarted,
            payload_run_started(self.provider.provider_id(), &model, &msg.channel, &msg.chat_id, resume_from),
        )?;
        let mut tool_stats: HashMap<String, u32> = HashMap::new();
        self.save_checkpoint(&run_id, &msg, &session_id, "received", 0, &tool_stats)?;

        let armed = should_arm_tools(&msg.content);
        push_history(&mut state.history, Message::user(&msg.content), self.limits.max_history);
        self.storage
            .store_message(&session_id, "user", &msg.content)
            .await
            .map_err(RuntimeError::from)?;

        let mut iterations: u32 = 0;
        let mut final_reply: Option<String> = None;
        let mut is_error = false;
        let mut tool_calls_this_turn: usize = 0;

        while iterations < self.limits.max_iterations as u32 {
            iterations += 1;
            if cancel.is_cancelled() {
                is_error = true;
                break;
            }
            self.save_checkpoint(&run_id, &msg, &session_id, "reasoning", iterations, &tool_stats)?;

            let trimmed = trim_history(&state.history, &self.limits);
            let mut messages = Vec::with_capacity(trimmed.len() + 1);
            messages.push(Message::system(self.identity.system_prompt()));
            messages.extend(trimmed);

            let tools: Vec<ToolDefinition> = if armed {
                self.tool_runtime.registry().all_definitions()
            } else {
                Vec::new()
            };

            let request = ChatRequest {
                messages,
                tools,
                temperature: Some(self.limits.temperature),
                max_tokens: None,
                model: self.provider_model.clone(),
            };

            let Some(response) = self.call_provider_with_retries(&run_id, &session_id, request).await else {
                final_reply = Some(
                    "I couldn't reach the model provider after several attempts. Please try again shortly."
                        .to_string(),
                );
                is_error = true;
                break;
            };

            let mut tool_calls = extract_tool_calls(&response.tool_calls, &response.content);
            let remaining_budget = self
                .limits
                .max_tool_calls_per_message
                .saturating_sub(tool_calls_this_turn);
            let truncated = tool_calls.len() > remaining_budget;
            if truncated {
                tool_calls.truncate(remaining_budget);
            }
            tool_calls_this_turn += tool_calls.len();

            if tool_calls.is_empty() && !truncated {
                push_history(
                    &mut state.history,
                    Message::assistant(&response.content),
                    self.limits.max_history,
                );
                self.storage
                    .store_message(&session_id, "assistant", &response.content)
                    .await
                    .map_err(RuntimeError::from)?;
                final_reply = Some(response.content);
                break;
            }

            push_history(
                &mut state.history,
                Message::assistant_with_tool_calls(&response.content, tool_calls.clone()),
                self.limits.max_history,
            );
            self.storage
                .store_message(&session_id, "assistant", &response.content)
                .await
                .map_err(RuntimeError::from)?;
            self.save_checkpoint(&run_id, &msg, &session_id, "tool_executing", iterations, &tool_stats)?;

            for call in &tool_calls {
                let envelope = build_envelope(
                    run_id.clone(),
                    session_id.clone(),
                    call.id.clone(),
                    call.name.clone(),
                    call.arguments.clone(),
                    &self.policy,
                    self.workspace_path.clone(),
                    30,
                    1,
                    false,
                );
                let (result, _meta) = self
                    .tool_runtime
                    .execute(&envelope)
                    .await
                    .map_err(RuntimeError::from)?;
                let content = if result.success {
                    result.output.clone()
                } else {
                    format!("error: {}", result.error.clone().unwrap_or_default())
                };
                push_history(
                    &mut state.history,
                    Message::tool_result(call.id.clone(), content.clone()),
                    self.limits.max_history,
                );
                self.storage
                    .store_message(&session_id, "tool", &content)
                    .await
                    .map_err(RuntimeError::from)?;
                *tool_stats.entry(call.name.clone()).or_insert(0) += 1;
            }

            if truncated {
                final_reply = Some(format!(
                    "Reached the per-message tool-call limit ({}); stopping here to avoid excessive tool calls.",
                    self.limits.max_tool_calls_per_message
                ));
                break;
            }
        }

        let final_reply = final_reply.unwrap_or_else(|| {
            is_error = true;
            "I reached the maximum number of steps for this turn without a final answer.".to_string()
        });

        self.save_checkpoint(&run_id, &msg, &session_id, "replying", iterations, &tool_stats)?;

        self.append_event(
            &run_id,
            &session_id,
            EventType::RunCompleted,
            payload_run_completed(iterations, is_error, &final_reply),
        )?;
        self.recovery.mark_completed(&run_id).map_err(RuntimeError::from)?;

        self.bus
            .publish_outbound(OutboundMessage::new(
                msg.channel.clone(),
                msg.chat_id.clone(),
                final_reply.clone(),
            ))
            .await?;

        let depth = msg.autonomous_followup_depth();
        if !is_error && is_autonomous_commitment(&final_reply) && depth < self.limits.autonomous_followup_depth {
            let mut followup = InboundMessage::new(
                msg.channel.clone(),
                msg.chat_id.clone(),
                "Continue with what you said you would do next.",
            );
            followup
                .metadata
                .insert("internal_autonomous_followup".into(), json!(true));
            followup
                .metadata
                .insert("autonomous_followup_depth".into(), json!(depth + 1));
            drop(state);
            self.bus.publish_inbound(followup).await?;
        }

        Ok(())
    }

    async fn call_provider_with_retries(
        &self,
        run_id: &str,
        session_id: &str,
        request: ChatRequest,
    ) -> Option<ChatResponse> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.provider.complete(request.clone()).await {
                Ok(response) => return Some(response),
                Err(err) => {
                    let message = err.to_string();
                    let info = classify_error_text(&message);
                    let _ = self.append_event(
                        run_id,
                        session_id,
                        EventType::ProviderFailed,
                        payload_provider_failed(self.provider.provider_id(), attempt, &message, &info),
                    );
                    if !info.retryable || attempt > self.limits.provider_max_retries {
                        return None;
                    }
                }
            }
        }
    }

    fn append_event(
        &self,
        run_id: &str,
        session_id: &str,
        event_type: EventType,
        payload: Map<String, Value>,
    ) -> Result<()> {
        self.tool_runtime
            .event_store()
            .append(sa_runtime_domain::event::RuntimeEvent::new(event_type, run_id, session_id, payload))?;
        Ok(())
    }

    fn save_checkpoint(
        &self,
        run_id: &str,
        msg: &InboundMessage,
        session_id: &str,
        stage: &str,
        iteration: u32,
        tool_stats: &HashMap<String, u32>,
    ) -> Result<()> {
        self.recovery
            .save(&RunCheckpoint {
                run_id: run_id.to_string(),
                channel: msg.channel.clone(),
                chat_id: msg.chat_id.clone(),
                session_id: session_id.to_string(),
                stage: stage.to_string(),
                iteration,
                user_message: msg.content.clone(),
                tool_stats: tool_stats.clone(),
                updated_at: chrono::Utc::now(),
            })
            .map_err(RuntimeError::from)
    }
}

fn derive_session_id(channel: &str, chat_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(channel.as_bytes());
    hasher.update(b"\0");
    hasher.update(chat_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn push_history(history: &mut Vec<Message>, message: Message, max_history: usize) {
    history.push(message);
    if history.len() > max_history {
        let excess = history.len() - max_history;
        history.drain(0..excess);
    }
}

/// Enforce `context_window` (message-count bound) first, then
/// `context_char_budget` (character bound), dropping oldest messages —
/// the original only implements the count bound; the character budget is
/// an explicit addition (§9 Open Question: tie-break order).
fn trim_history(history: &[Message], limits: &AgentLimits) -> Vec<Message> {
    let mut window: Vec<Message> = if history.len() > limits.context_window {
        history[history.len() - limits.context_window..].to_vec()
    } else {
        history.to_vec()
    };

    let mut total: usize = window.iter().map(Message::char_len).sum();
    while total > limits.context_char_budget && window.len() > 1 {
        let removed = window.remove(0);
        total -= removed.char_len();
    }
    window
}

fn payload_run_started(
    provider_id: &str,
    model: &str,
    channel: &str,
    chat_id: &str,
    resume_from: Option<&str>,
) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("channel".into(), json!(channel));
    map.insert("chat_id".into(), json!(chat_id));
    map.insert("engine".into(), json!(provider_id));
    map.insert("engine_resolved".into(), json!(model));
    if let Some(resume_from) = resume_from {
        map.insert("recovery_resume_from".into(), json!(resume_from));
    }
    map
}

fn payload_run_completed(iterations: u32, is_error: bool, response: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("iterations".into(), json!(iterations));
    map.insert("is_error".into(), json!(is_error));
    map.insert("response_preview".into(), json!(truncate_preview(response)));
    map
}

fn payload_provider_failed(provider: &str, attempt: u32, error: &str, info: &FailureInfo) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("provider".into(), json!(provider));
    map.insert("attempt".into(), json!(attempt));
    map.insert("error".into(), json!(error));
    map.insert("failure_code".into(), json!(info.code.as_str()));
    map.insert("retryable".into(), json!(info.retryable));
    map.insert("failure_category".into(), json!(info.category.as_str()));
    map
}

fn truncate_preview(s: &str) -> String {
    const MAX_CHARS: usize = 200;
    if s.chars().count() > MAX_CHARS {
        let mut preview: String = s.chars().take(MAX_CHARS).collect();
        preview.push('…');
        preview
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sa_runtime_domain::capability::LlmCapabilities;
    use sa_runtime_domain::config::PolicyConfig;
    use sa_runtime_domain::envelope::ToolResult;
    use sa_runtime_domain::error::{Error as DomainError, Result as DomainResult};
    use sa_runtime_domain::stream::{BoxStream, StreamEvent};
    use sa_runtime_domain::tool::ToolCall;
    use sa_runtime_store::{EventStore, JsonlStorageBackend};
    use sa_runtime_tools::{Tool, ToolRegistry};
    use serde_json::json as jsonval;
    use tempfile::tempdir;

    use crate::provider::ScriptedProvider;
    use crate::ratelimit::OutboundRateLimiter;

    struct EchoArgTool;

    #[async_trait]
    impl Tool for EchoArgTool {
        fn name(&self) -> &str {
            "counting_tool"
        }
        fn description(&self) -> &str {
            "returns a fixed value"
        }
        fn parameters_schema(&self) -> Value {
            jsonval!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: Value) -> ToolResult {
            ToolResult::ok("42")
        }
    }

    struct AlwaysFailProvider {
        capabilities: LlmCapabilities,
    }

    #[async_trait]
    impl LlmProvider for AlwaysFailProvider {
        async fn complete(&self, _req: ChatRequest) -> DomainResult<ChatResponse> {
            Err(DomainError::Provider {
                provider: "test".into(),
                message: "boom".into(),
            })
        }
        async fn stream(&self, _req: ChatRequest) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
        fn capabilities(&self) -> &LlmCapabilities {
            &self.capabilities
        }
        fn provider_id(&self) -> &str {
            "always_fail"
        }
    }

    struct FlakyProvider {
        capabilities: LlmCapabilities,
        failures_remaining: std::sync::atomic::AtomicU32,
        success: ChatResponse,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(&self, _req: ChatRequest) -> DomainResult<ChatResponse> {
            if self
                .failures_remaining
                .fetch_update(
                    std::sync::atomic::Ordering::SeqCst,
                    std::sync::atomic::Ordering::SeqCst,
                    |n| if n > 0 { Some(n - 1) } else { None },
                )
                .is_ok()
            {
                return Err(DomainError::Provider {
                    provider: "test".into(),
                    message: "429 rate limit exceeded, slow down".into(),
                });
            }
            Ok(self.success.clone())
        }
        async fn stream(&self, _req: ChatRequest) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
        fn capabilities(&self) -> &LlmCapabilities {
            &self.capabilities
        }
        fn provider_id(&self) -> &str {
            "flaky"
        }
    }

    fn response(content: &str, tool_calls: Vec<ToolCall>) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls,
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        }
    }

    struct Harness {
        agent: Arc<AgentLoop>,
        bus: Arc<MessageBus>,
    }

    fn build_harness(dir: &std::path::Path, provider: Arc<dyn LlmProvider>, limits: AgentLimits) -> Harness {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoArgTool));
        let event_store = EventStore::new(dir.join("events.jsonl"), false).unwrap();
        let policy = PolicyEngine::new(PolicyConfig::default());
        let tool_runtime = Arc::new(DeterministicToolRuntime::new(registry, event_store, policy));

        let storage: Arc<dyn StorageBackend> = Arc::new(JsonlStorageBackend::new(dir.join("transcripts")));
        let recovery = Arc::new(RecoveryManager::new(dir.join("checkpoints")).unwrap());
        let policy = Arc::new(PolicyEngine::new(PolicyConfig::default()));
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity("You are a helpful agent.".into()));
        let bus = Arc::new(MessageBus::new(
            10,
            Arc::new(OutboundRateLimiter::new(100, 1000, sa_runtime_domain::config::RateLimitMode::Lenient, 1000)),
        ));

        let agent = Arc::new(AgentLoop::new(
            bus.clone(),
            provider,
            Some("test-model".into()),
            tool_runtime,
            storage,
            recovery,
            policy,
            identity,
            limits,
            "/workspace",
        ));
        Harness { agent, bus }
    }

    fn fast_limits() -> AgentLimits {
        let mut limits = AgentLimits::default();
        limits.max_iterations = 4;
        limits.provider_max_retries = 1;
        limits
    }

    #[tokio::test]
    async fn turn_without_tool_calls_publishes_final_reply() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(
            LlmCapabilities::default(),
            vec![response("Hello there.", vec![])],
        ));
        let harness = build_harness(dir.path(), provider, fast_limits());

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "hi"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(out.content, "Hello there.");
    }

    #[tokio::test]
    async fn turn_with_tool_call_executes_and_continues() {
        let dir = tempdir().unwrap();
        let call = ToolCall {
            id: "call_0".into(),
            name: "counting_tool".into(),
            arguments: jsonval!({}),
        };
        let provider = Arc::new(ScriptedProvider::new(
            LlmCapabilities::default(),
            vec![response("", vec![call]), response("Done.", vec![])],
        ));
        let harness = build_harness(dir.path(), provider, fast_limits());

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "please run the tool"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(out.content, "Done.");
    }

    #[tokio::test]
    async fn provider_failure_exhausts_retries_and_replies_with_fallback() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(AlwaysFailProvider {
            capabilities: LlmCapabilities::default(),
        });
        let harness = build_harness(dir.path(), provider, fast_limits());

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "hi"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert!(out.content.contains("couldn't reach"));
    }

    #[tokio::test]
    async fn autonomous_commitment_enqueues_bounded_followup() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(
            LlmCapabilities::default(),
            vec![response("I'll go check the logs now.", vec![])],
        ));
        let harness = build_harness(dir.path(), provider, fast_limits());

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "hi"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();
        let _ = harness.bus.consume_outbound(&cancel).await.unwrap();

        let followup = harness.bus.consume_inbound(&cancel).await.unwrap();
        assert!(followup.is_autonomous_followup());
        assert_eq!(followup.autonomous_followup_depth(), 1);
    }

    #[tokio::test]
    async fn excessive_tool_calls_are_truncated_with_explanatory_reply() {
        let dir = tempdir().unwrap();
        let calls: Vec<ToolCall> = (0..20)
            .map(|i| ToolCall {
                id: format!("call_{i}"),
                name: "counting_tool".into(),
                arguments: jsonval!({}),
            })
            .collect();
        let provider = Arc::new(ScriptedProvider::new(LlmCapabilities::default(), vec![response("", calls)]));
        let mut limits = fast_limits();
        limits.max_tool_calls_per_message = 2;
        let harness = build_harness(dir.path(), provider, limits);

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "run everything"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert!(out.content.contains("per-message tool-call limit"));
    }

    #[tokio::test]
    async fn repeated_single_tool_call_stops_after_cumulative_budget() {
        // Mirrors the literal scenario of a provider that keeps returning the
        // same tool call turn after turn: with max_tool_calls_per_message = 1
        // the loop must stop after the first execution, not after the first
        // message that happens to carry more than one call.
        let dir = tempdir().unwrap();
        let call = || ToolCall {
            id: "call_repeat".into(),
            name: "counting_tool".into(),
            arguments: jsonval!({}),
        };
        let provider = Arc::new(ScriptedProvider::new(
            LlmCapabilities::default(),
            vec![
                response("", vec![call()]),
                response("", vec![call()]),
                response("", vec![call()]),
                response("", vec![call()]),
            ],
        ));
        let mut limits = fast_limits();
        limits.max_tool_calls_per_message = 1;
        let harness = build_harness(dir.path(), provider, limits);

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "run the tool"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert!(out.content.to_lowercase().contains("avoid excessive tool calls"));
    }

    #[tokio::test]
    async fn provider_rate_limit_retry_then_success_completes_run() {
        let dir = tempdir().unwrap();
        let provider = Arc::new(FlakyProvider {
            capabilities: LlmCapabilities::default(),
            failures_remaining: std::sync::atomic::AtomicU32::new(1),
            success: response("Here you go.", vec![]),
        });
        let harness = build_harness(dir.path(), provider, fast_limits());

        harness
            .bus
            .publish_inbound(InboundMessage::new("cli", "c1", "hi"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let msg = harness.bus.consume_inbound(&cancel).await.unwrap();
        harness.agent.process_message(msg, cancel.clone()).await.unwrap();

        let out = harness.bus.consume_outbound(&cancel).await.unwrap();
        assert_eq!(out.content, "Here you go.");

        let events = harness.agent.tool_runtime.event_store().iter(None, None);
        let provider_failed = events
            .iter()
            .find(|e| matches!(e.event_type, EventType::ProviderFailed))
            .expect("a ProviderFailed event should be recorded for the rate-limited attempt");
        assert_eq!(
            provider_failed.payload.get("failure_code").and_then(Value::as_str),
            Some("rate_limited")
        );
        assert_eq!(provider_failed.payload.get("retryable").and_then(Value::as_bool), Some(true));

        let run_completed = events
            .iter()
            .find(|e| matches!(e.event_type, EventType::RunCompleted))
            .expect("a RunCompleted event should be recorded once the retry succeeds");
        assert_eq!(run_completed.payload.get("is_error").and_then(Value::as_bool), Some(false));
    }

    #[test]
    fn trim_history_enforces_count_then_char_budget() {
        let mut limits = AgentLimits::default();
        limits.context_window = 10;
        limits.context_char_budget = 5;

        let history: Vec<Message> = vec![
            Message::user("aaa"),
            Message::user("bbb"),
            Message::user("c"),
        ];
        let trimmed = trim_history(&history, &limits);
        let total: usize = trimmed.iter().map(Message::char_len).sum();
        assert!(total <= 5 || trimmed.len() == 1);
        assert_eq!(trimmed.last().unwrap().char_len(), 1);
    }
}
