use serde::{Deserialize, Serialize};

/// Capabilities an `LlmProvider` implementation advertises about the model it
/// is currently bound to. The agent loop uses these to decide whether to pass
/// a tool catalog, request streaming, or fall back to prompt-based tool-call
/// extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_tools: ToolSupport,
    pub supports_streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: ToolSupport::None,
            supports_streaming: false,
            context_window_tokens: None,
        }
    }
}

/// Tool support level a provider/model combination advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    /// No native tool calling; the agent loop must rely on XML/JSON-block
    /// extraction from plain text.
    None,
    /// Native function/tool calling.
    Native,
}
