use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One append-only record in the event store (C1).
///
/// `payload` is a loosely-typed JSON object; §6's required-keys table is
/// enforced by convention at each call site (see `EventType::required_payload_keys`)
/// rather than by the type system, so that new event types remain additive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeEvent {
    pub event_type: EventType,
    pub run_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl RuntimeEvent {
    pub fn new(
        event_type: EventType,
        run_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event_type,
            run_id: run_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    RunStarted,
    ToolRequested,
    ToolStarted,
    ToolCompleted,
    ToolFailed,
    ProviderFailed,
    StorageFailed,
    ChannelFailed,
    RunCompleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunStarted => "RunStarted",
            EventType::ToolRequested => "ToolRequested",
            EventType::ToolStarted => "ToolStarted",
            EventType::ToolCompleted => "ToolCompleted",
            EventType::ToolFailed => "ToolFailed",
            EventType::ProviderFailed => "ProviderFailed",
            EventType::StorageFailed => "StorageFailed",
            EventType::ChannelFailed => "ChannelFailed",
            EventType::RunCompleted => "RunCompleted",
        }
    }

    /// Required payload keys for this event type, per §6's table. Callers
    /// that build events assert their payload contains these keys; tests
    /// asserting E3 (event completeness) check against this list too.
    pub fn required_payload_keys(&self) -> &'static [&'static str] {
        match self {
            EventType::RunStarted => &["channel", "chat_id", "engine", "engine_resolved"],
            EventType::ToolRequested => {
                &["tool_call_id", "tool_name", "arguments", "execution_mode"]
            }
            EventType::ToolStarted => &["tool_call_id", "tool_name"],
            EventType::ToolCompleted => &["tool_call_id", "tool_name", "success"],
            EventType::ToolFailed => &[
                "tool_call_id",
                "tool_name",
                "error",
                "failure_code",
                "retryable",
                "failure_category",
            ],
            EventType::ProviderFailed => &[
                "provider",
                "attempt",
                "error",
                "failure_code",
                "retryable",
                "failure_category",
            ],
            EventType::StorageFailed => &["role", "backend", "error"],
            EventType::ChannelFailed => &["channel", "chat_id", "error"],
            EventType::RunCompleted => &["iterations", "is_error"],
        }
    }
}
