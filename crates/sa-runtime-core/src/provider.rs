//! Provider capability boundary (§9: "a `Provider` capability
//! `{complete, stream, close}`"). The concrete HTTP adapters are out of
//! scope here (§1); this crate defines the trait the agent loop calls
//! through and a scripted test double for exercising it.
//!
//! Grounded on the existing `LlmProvider` trait shape (`chat`,
//! `chat_stream`, `embeddings`, `capabilities`, `provider_id`) elsewhere in
//! this workspace's providers crate.

use sa_runtime_domain::capability::LlmCapabilities;
use sa_runtime_domain::error::Result;
use sa_runtime_domain::stream::{BoxStream, StreamEvent, Usage};
use sa_runtime_domain::tool::{Message, ToolCall, ToolDefinition};

/// A provider-agnostic chat completion request (§6 provider contract).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Capability boundary every LLM adapter implements. The agent loop (C9)
/// is the sole caller; production adapters live outside this workspace.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, req: ChatRequest) -> Result<ChatResponse>;

    async fn stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    fn capabilities(&self) -> &LlmCapabilities;

    fn provider_id(&self) -> &str;
}

/// Hand-written scripted provider for tests (§10.5): returns queued
/// responses in order, looping the last one once exhausted, mirroring how
/// the original Python test suite scripts providers rather than mocking.
pub struct ScriptedProvider {
    capabilities: LlmCapabilities,
    responses: parking_lot::Mutex<std::collections::VecDeque<ChatResponse>>,
    last: parking_lot::Mutex<Option<ChatResponse>>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(capabilities: LlmCapabilities, responses: Vec<ChatResponse>) -> Self {
        Self {
            capabilities,
            responses: parking_lot::Mutex::new(responses.into()),
            last: parking_lot::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _req: ChatRequest) -> Result<ChatResponse> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let next = self.responses.lock().pop_front();
        let response = match next {
            Some(r) => {
                *self.last.lock() = Some(clone_response(&r));
                r
            }
            None => self
                .last
                .lock()
                .as_ref()
                .map(clone_response)
                .unwrap_or(ChatResponse {
                    content: String::new(),
                    tool_calls: Vec::new(),
                    usage: None,
                    model: "scripted".into(),
                    finish_reason: Some("stop".into()),
                }),
        };
        Ok(response)
    }

    async fn stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        Ok(Box::pin(futures_util::stream::empty()))
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

fn clone_response(r: &ChatResponse) -> ChatResponse {
    ChatResponse {
        content: r.content.clone(),
        tool_calls: r.tool_calls.clone(),
        usage: r.usage.clone(),
        model: r.model.clone(),
        finish_reason: r.finish_reason.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_runtime_domain::capability::ToolSupport;

    fn response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        }
    }

    #[tokio::test]
    async fn scripted_provider_returns_queued_responses_in_order() {
        let provider = ScriptedProvider::new(
            LlmCapabilities::default(),
            vec![response("first"), response("second")],
        );
        let r1 = provider.complete(ChatRequest::default()).await.unwrap();
        let r2 = provider.complete(ChatRequest::default()).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
    }

    #[tokio::test]
    async fn scripted_provider_repeats_last_response_once_exhausted() {
        let provider = ScriptedProvider::new(LlmCapabilities::default(), vec![response("only")]);
        let _ = provider.complete(ChatRequest::default()).await.unwrap();
        let r2 = provider.complete(ChatRequest::default()).await.unwrap();
        assert_eq!(r2.content, "only");
    }

    #[test]
    fn capabilities_advertise_tool_support() {
        let caps = LlmCapabilities {
            supports_tools: ToolSupport::Native,
            supports_streaming: false,
            context_window_tokens: None,
        };
        let provider = ScriptedProvider::new(caps, vec![]);
        assert_eq!(provider.capabilities().supports_tools, ToolSupport::Native);
    }
}
