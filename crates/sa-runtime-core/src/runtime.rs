//! Deterministic Tool Runtime (C5, §4.5): the normalized contract every
//! tool call goes through — authorize, dedupe via idempotency cache,
//! dispatch with retries, emit the full event trail.
//!
//! Grounded on `clawlet/runtime/executor.py::DeterministicToolRuntime`.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use sa_runtime_domain::envelope::{ExecutionMode, ToolCallEnvelope, ToolResult};
use sa_runtime_domain::error::{Error as DomainError, Result as DomainResult};
use sa_runtime_domain::event::{EventType, RuntimeEvent};
use sa_runtime_policy::failure::is_retryable_error_text;
use sa_runtime_policy::mode::PolicyEngine;
use sa_runtime_policy::classify_error_text;
use sa_runtime_store::EventStore;
use sa_runtime_tools::ToolRegistry;

/// Extra detail returned alongside a [`ToolResult`] (§4.5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolExecutionMetadata {
    pub duration_ms: f64,
    pub attempts: u32,
    pub cached: bool,
}

/// Executes tool calls through the deterministic contract (§4.5).
pub struct DeterministicToolRuntime {
    registry: ToolRegistry,
    event_store: EventStore,
    policy: PolicyEngine,
    idempotency_cache: Mutex<HashMap<String, ToolResult>>,
}

impl DeterministicToolRuntime {
    pub fn new(registry: ToolRegistry, event_store: EventStore, policy: PolicyEngine) -> Self {
        Self {
            registry,
            event_store,
            policy,
            idempotency_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn event_store(&self) -> &EventStore {
        &self.event_store
    }

    /// Execute one envelope through the full deterministic contract
    /// (§4.5 steps 1-7).
    pub async fn execute(&self, envelope: &ToolCallEnvelope) -> DomainResult<(ToolResult, ToolExecutionMetadata)> {
        self.append(
            &envelope.run_id,
            &envelope.session_id,
            EventType::ToolRequested,
            payload_tool_requested(envelope),
        )?;

        let decision = self.policy.authorize(envelope.execution_mode, envelope.approved);
        if !decision.allowed {
            let result = ToolResult::failure(decision.reason.clone());
            let info = classify_error_text(&decision.reason);
            self.append(
                &envelope.run_id,
                &envelope.session_id,
                EventType::ToolFailed,
                payload_tool_failed(envelope, &decision.reason, &info),
            )?;
            return Ok((
                result,
                ToolExecutionMetadata {
                    duration_ms: 0.0,
                    attempts: 0,
                    cached: false,
                },
            ));
        }

        let idempotency_key = envelope
            .idempotency_key
            .clone()
            .unwrap_or_else(|| build_idempotency_key(envelope));

        if let Some(cached) = self.idempotency_cache.lock().get(&idempotency_key).cloned() {
            self.append(
                &envelope.run_id,
                &envelope.session_id,
                EventType::ToolCompleted,
                payload_tool_completed(envelope, &cached, true),
            )?;
            return Ok((
                cached,
                ToolExecutionMetadata {
                    duration_ms: 0.0,
                    attempts: 0,
                    cached: true,
                },
            ));
        }

        self.append(
            &envelope.run_id,
            &envelope.session_id,
            EventType::ToolStarted,
            payload_tool_started(envelope),
        )?;

        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_result = ToolResult::failure("unknown error");

        let max_attempts = 1 + envelope.max_retries;
        for _ in 0..max_attempts.max(1) {
            attempts += 1;
            last_result = self.registry.execute(&envelope.tool_name, envelope.arguments.clone()).await;
            let retryable = last_result
                .error
                .as_deref()
                .map(is_retryable_error_text)
                .unwrap_or(false);
            if last_result.success || !retryable {
                break;
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let metadata = ToolExecutionMetadata {
            duration_ms,
            attempts,
            cached: false,
        };

        if last_result.success {
            self.idempotency_cache
                .lock()
                .insert(idempotency_key, last_result.clone());
            self.append(
                &envelope.run_id,
                &envelope.session_id,
                EventType::ToolCompleted,
                payload_tool_completed_with_metadata(envelope, &last_result, &metadata),
            )?;
        } else {
            let error = last_result.error.clone().unwrap_or_default();
            let info = classify_error_text(&error);
            self.append(
                &envelope.run_id,
                &envelope.session_id,
                EventType::ToolFailed,
                payload_tool_failed_with_metadata(envelope, &error, &info, &metadata),
            )?;
        }

        Ok((last_result, metadata))
    }

    fn append(
        &self,
        run_id: &str,
        session_id: &str,
        event_type: EventType,
        payload: Map<String, Value>,
    ) -> DomainResult<()> {
        self.event_store
            .append(RuntimeEvent::new(event_type, run_id, session_id, payload))
            .map_err(|e| match e {
                DomainError::Io(inner) => DomainError::Io(inner),
                other => other,
            })
    }
}

fn build_idempotency_key(envelope: &ToolCallEnvelope) -> String {
    let canonical = json!({
        "session_id": envelope.session_id,
        "tool_name": envelope.tool_name,
        "arguments": envelope.arguments,
        "tool_call_id": envelope.tool_call_id,
    });
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hex::encode(hasher.finalize())
}

fn payload_tool_requested(envelope: &ToolCallEnvelope) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("tool_call_id".into(), json!(envelope.tool_call_id));
    map.insert("tool_name".into(), json!(envelope.tool_name));
    map.insert("execution_mode".into(), json!(envelope.execution_mode.as_str()));
    map.insert("arguments".into(), envelope.arguments.clone());
    map
}

fn payload_tool_started(envelope: &ToolCallEnvelope) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("tool_call_id".into(), json!(envelope.tool_call_id));
    map.insert("tool_name".into(), json!(envelope.tool_name));
    map
}

fn payload_tool_completed(envelope: &ToolCallEnvelope, result: &ToolResult, cached: bool) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("tool_call_id".into(), json!(envelope.tool_call_id));
    map.insert("tool_name".into(), json!(envelope.tool_name));
    map.insert("success".into(), json!(result.success));
    map.insert("cached".into(), json!(cached));
    map.insert("output".into(), json!(result.output));
    map
}

fn payload_tool_completed_with_metadata(
    envelope: &ToolCallEnvelope,
    result: &ToolResult,
    metadata: &ToolExecutionMetadata,
) -> Map<String, Value> {
    let mut map = payload_tool_completed(envelope, result, false);
    map.insert(
        "metadata".into(),
        json!({
            "duration_ms": metadata.duration_ms,
            "attempts": metadata.attempts,
            "cached": metadata.cached,
        }),
    );
    map
}

fn payload_tool_failed(
    envelope: &ToolCallEnvelope,
    error: &str,
    info: &sa_runtime_domain::failure::FailureInfo,
) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("tool_call_id".into(), json!(envelope.tool_call_id));
    map.insert("tool_name".into(), json!(envelope.tool_name));
    map.insert("error".into(), json!(error));
    map.insert("failure_code".into(), json!(info.code.as_str()));
    map.insert("retryable".into(), json!(info.retryable));
    map.insert("failure_category".into(), json!(info.category.as_str()));
    map
}

fn payload_tool_failed_with_metadata(
    envelope: &ToolCallEnvelope,
    error: &str,
    info: &sa_runtime_domain::failure::FailureInfo,
    metadata: &ToolExecutionMetadata,
) -> Map<String, Value> {
    let mut map = payload_tool_failed(envelope, error, info);
    map.insert(
        "metadata".into(),
        json!({
            "duration_ms": metadata.duration_ms,
            "attempts": metadata.attempts,
        }),
    );
    map
}

/// Infer the execution mode for a `(tool_name, arguments)` pair and build a
/// ready-to-execute envelope. A small convenience the agent loop (C9) uses
/// so it doesn't have to hand-assemble every field.
pub fn build_envelope(
    run_id: impl Into<String>,
    session_id: impl Into<String>,
    tool_call_id: impl Into<String>,
    tool_name: impl Into<String>,
    arguments: Value,
    policy: &PolicyEngine,
    workspace_path: impl Into<String>,
    timeout_seconds: u64,
    max_retries: u32,
    approved: bool,
) -> ToolCallEnvelope {
    let tool_name = tool_name.into();
    let execution_mode = policy.infer_mode(&tool_name, &arguments);
    ToolCallEnvelope {
        run_id: run_id.into(),
        session_id: session_id.into(),
        tool_call_id: tool_call_id.into(),
        tool_name,
        arguments,
        execution_mode,
        workspace_path: workspace_path.into(),
        timeout_seconds,
        max_retries,
        idempotency_key: None,
        requested_at: chrono::Utc::now(),
        approved,
    }
}

#[allow(dead_code)]
fn is_elevated(mode: ExecutionMode) -> bool {
    matches!(mode, ExecutionMode::Elevated)
}
