use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The policy axis governing tool authorization (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    ReadOnly,
    WorkspaceWrite,
    Elevated,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::ReadOnly => "read_only",
            ExecutionMode::WorkspaceWrite => "workspace_write",
            ExecutionMode::Elevated => "elevated",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The immutable descriptor of one tool invocation attempt handed to the
/// deterministic tool runtime (C5). Each envelope corresponds to exactly one
/// tool invocation attempt stream — the runtime may retry internally, but a
/// single envelope never spawns a second `ToolRequested`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEnvelope {
    pub run_id: String,
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub execution_mode: ExecutionMode,
    pub workspace_path: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    /// Explicit idempotency key override. When absent, the runtime derives
    /// one from `(session_id, tool_name, arguments, tool_call_id)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub requested_at: DateTime<Utc>,
    /// Human-in-the-loop approval flag for elevated-mode authorization.
    #[serde(default)]
    pub approved: bool,
}

/// Outcome of one tool invocation, returned by a `Tool::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            data: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
            data: None,
        }
    }
}
