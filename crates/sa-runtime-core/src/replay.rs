//! Replay/Reexecution (C11, §4.11): reconstruct what happened in a run from
//! its event trail, optionally re-run its tool calls against the live
//! registry, and check that a recovery-resumed run picked up where its
//! predecessor left off.
//!
//! Grounded on `clawlet/runtime/replay.py` (`replay_run`, `reexecute_run`,
//! `verify_resume_equivalence`), reworked onto the typed `RuntimeEvent`/
//! `FailureInfo` model this workspace already uses instead of the
//! original's loosely-typed dict payloads.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use sha2::{Digest, Sha256};

use sa_runtime_domain::envelope::ExecutionMode;
use sa_runtime_domain::error::Result as DomainResult;
use sa_runtime_domain::event::{EventType, RuntimeEvent};
use sa_runtime_policy::mode::PolicyEngine;
use sa_runtime_store::EventStore;

use crate::runtime::{build_envelope, DeterministicToolRuntime};

/// What `replay_run` found by walking one run's event trail (§4.11 step 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub run_id: String,
    pub has_start: bool,
    pub has_end: bool,
    pub tool_calls_requested: Vec<String>,
    pub tool_calls_started: Vec<String>,
    pub tool_calls_finished: Vec<String>,
    /// Tool call ids that were requested more than once.
    pub duplicate_requests: Vec<String>,
    /// `ToolStarted` ids with no matching `ToolRequested`.
    pub orphan_starts: Vec<String>,
    pub signature: Option<String>,
    /// True when the run has a start, an end, a signature, and no
    /// consistency warnings.
    pub deterministic_ok: bool,
}

/// Reconstruct a run's shape from its event trail (§4.11).
pub fn replay_run(event_store: &EventStore, run_id: &str) -> ReplayReport {
    let events = event_store.iter(Some(run_id), None);

    let has_start = events.iter().any(|e| e.event_type == EventType::RunStarted);
    let has_end = events.iter().any(|e| e.event_type == EventType::RunCompleted);

    let mut requested = Vec::new();
    let mut requested_seen = HashSet::new();
    let mut duplicate_requests = Vec::new();
    let mut started = Vec::new();
    let mut finished = Vec::new();

    for event in &events {
        let Some(id) = event.payload.get("tool_call_id").and_then(Value::as_str) else {
            continue;
        };
        match event.event_type {
            EventType::ToolRequested => {
                if !requested_seen.insert(id.to_string()) {
                    duplicate_requests.push(id.to_string());
                }
                requested.push(id.to_string());
            }
            EventType::ToolStarted => started.push(id.to_string()),
            EventType::ToolCompleted | EventType::ToolFailed => finished.push(id.to_string()),
            _ => {}
        }
    }

    let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let orphan_starts: Vec<String> = started
        .iter()
        .filter(|id| !requested_set.contains(id.as_str()))
        .cloned()
        .collect();

    let signature = event_store.signature(run_id).ok();
    let deterministic_ok =
        has_start && has_end && signature.is_some() && duplicate_requests.is_empty() && orphan_starts.is_empty();

    ReplayReport {
        run_id: run_id.to_string(),
        has_start,
        has_end,
        tool_calls_requested: requested,
        tool_calls_started: started,
        tool_calls_finished: finished,
        duplicate_requests,
        orphan_starts,
        signature,
        deterministic_ok,
    }
}

/// Comparison between a recorded tool outcome and a freshly re-executed one
/// (§4.11 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReexecutionDetail {
    pub tool_call_id: String,
    pub tool_name: String,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub recorded_success: Option<bool>,
    pub reexecuted_success: Option<bool>,
    pub output_hash_matches: Option<bool>,
    pub mismatched: bool,
    pub reason: Option<String>,
}

struct RecordedOutcome {
    success: bool,
    output_hash: Option<String>,
    failure_code: Option<String>,
}

struct RequestedCall {
    tool_call_id: String,
    tool_name: String,
    arguments: Value,
    execution_mode: String,
}

fn collect_requested_calls(events: &[RuntimeEvent]) -> Vec<RequestedCall> {
    events
        .iter()
        .filter(|e| e.event_type == EventType::ToolRequested)
        .filter_map(|e| {
            let tool_call_id = e.payload.get("tool_call_id")?.as_str()?.to_string();
            let tool_name = e.payload.get("tool_name")?.as_str()?.to_string();
            let arguments = e.payload.get("arguments").cloned().unwrap_or(Value::Null);
            let execution_mode = e
                .payload
                .get("execution_mode")
                .and_then(Value::as_str)
                .unwrap_or("workspace_write")
                .to_string();
            Some(RequestedCall {
                tool_call_id,
                tool_name,
                arguments,
                execution_mode,
            })
        })
        .collect()
}

fn collect_recorded_outcomes(events: &[RuntimeEvent]) -> HashMap<String, RecordedOutcome> {
    let mut outcomes = HashMap::new();
    for event in events {
        let Some(id) = event.payload.get("tool_call_id").and_then(Value::as_str) else {
            continue;
        };
        match event.event_type {
            EventType::ToolCompleted => {
                let output_hash = event.payload.get("output").and_then(Value::as_str).map(hash_text);
                outcomes.insert(
                    id.to_string(),
                    RecordedOutcome {
                        success: true,
                        output_hash,
                        failure_code: None,
                    },
                );
            }
            EventType::ToolFailed => {
                let failure_code = event
                    .payload
                    .get("failure_code")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                outcomes.insert(
                    id.to_string(),
                    RecordedOutcome {
                        success: false,
                        output_hash: None,
                        failure_code,
                    },
                );
            }
            _ => {}
        }
    }
    outcomes
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Re-run a completed run's recorded tool calls against the live registry
/// and compare outcomes. Elevated-mode calls are always skipped; other
/// write-mode calls are skipped unless `allow_write` (§4.11 step 2 safety
/// rule — re-running a destructive call during an audit is the caller's
/// explicit choice, not the default).
pub async fn reexecute_run(
    event_store: &EventStore,
    tool_runtime: &DeterministicToolRuntime,
    policy: &PolicyEngine,
    run_id: &str,
    session_id: &str,
    workspace_path: &str,
    allow_write: bool,
) -> DomainResult<Vec<ReexecutionDetail>> {
    let events = event_store.iter(Some(run_id), None);
    let requested = collect_requested_calls(&events);
    let recorded = collect_recorded_outcomes(&events);

    let mut details = Vec::with_capacity(requested.len());

    for call in requested {
        let recorded_outcome = recorded.get(&call.tool_call_id);

        if call.execution_mode == ExecutionMode::Elevated.as_str() {
            details.push(ReexecutionDetail {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                skipped: true,
                skip_reason: Some("elevated-mode calls are never reexecuted".to_string()),
                recorded_success: recorded_outcome.map(|o| o.success),
                reexecuted_success: None,
                output_hash_matches: None,
                mismatched: false,
                reason: None,
            });
            continue;
        }
        if !allow_write && call.execution_mode != ExecutionMode::ReadOnly.as_str() {
            details.push(ReexecutionDetail {
                tool_call_id: call.tool_call_id,
                tool_name: call.tool_name,
                skipped: true,
                skip_reason: Some("write-mode call skipped; pass allow_write to reexecute".to_string()),
                recorded_success: recorded_outcome.map(|o| o.success),
                reexecuted_success: None,
                output_hash_matches: None,
                mismatched: false,
                reason: None,
            });
            continue;
        }

        let envelope = build_envelope(
            format!("{run_id}-replay"),
            session_id,
            format!("{}-replay", call.tool_call_id),
            call.tool_name.clone(),
            call.arguments,
            policy,
            workspace_path,
            30,
            0,
            true,
        );
        let (result, _meta) = tool_runtime.execute(&envelope).await?;

        let recorded_success = recorded_outcome.map(|o| o.success);
        let output_hash_matches = match recorded_outcome.and_then(|o| o.output_hash.as_ref()) {
            Some(recorded_hash) if result.success => Some(*recorded_hash == hash_text(&result.output)),
            _ => None,
        };

        let mut reasons = Vec::new();
        if let Some(recorded_success) = recorded_success {
            if recorded_success != result.success {
                reasons.push(format!(
                    "success mismatch: recorded={recorded_success} reexecuted={}",
                    result.success
                ));
            }
        }
        if output_hash_matches == Some(false) {
            reasons.push("output hash differs from the recorded output".to_string());
        }
        if !result.success {
            if let Some(recorded) = recorded_outcome {
                if let Some(recorded_code) = &recorded.failure_code {
                    tracing::debug!(recorded_code, "recorded failure code retained for comparison");
                }
            }
        }

        details.push(ReexecutionDetail {
            tool_call_id: call.tool_call_id,
            tool_name: call.tool_name,
            skipped: false,
            skip_reason: None,
            recorded_success,
            reexecuted_success: Some(result.success),
            output_hash_matches,
            mismatched: !reasons.is_empty(),
            reason: if reasons.is_empty() { None } else { Some(reasons.join("; ")) },
        });
    }

    Ok(details)
}

/// Outcome of checking whether a successor run that claims to resume
/// `source_run_id` actually picked up the same tool-call sequence
/// (§4.11 step 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeEquivalenceReport {
    pub source_run_id: String,
    pub successor_run_id: Option<String>,
    pub source_had_tool_activity: bool,
    pub tool_name_sequence_overlaps: bool,
    pub equivalent: bool,
}

fn tool_name_sequence(events: &[RuntimeEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.event_type == EventType::ToolRequested)
        .filter_map(|e| e.payload.get("tool_name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

fn find_resume_successor(event_store: &EventStore, source_run_id: &str) -> Option<String> {
    event_store
        .iter(None, None)
        .into_iter()
        .find(|e| {
            e.event_type == EventType::RunStarted
                && e.payload.get("recovery_resume_from").and_then(Value::as_str) == Some(source_run_id)
        })
        .map(|e| e.run_id)
}

/// Verify that any run resuming from `source_run_id` carried forward a
/// non-trivial overlap of the tool names the source run had already
/// requested, when the source had tool activity at all.
pub fn verify_resume_equivalence(event_store: &EventStore, source_run_id: &str) -> ResumeEquivalenceReport {
    let source_events = event_store.iter(Some(source_run_id), None);
    let source_sequence = tool_name_sequence(&source_events);
    let source_had_tool_activity = !source_sequence.is_empty();

    let successor_run_id = find_resume_successor(event_store, source_run_id);
    let tool_name_sequence_overlaps = match &successor_run_id {
        Some(successor) => {
            let successor_events = event_store.iter(Some(successor), None);
            let successor_sequence: HashSet<String> = tool_name_sequence(&successor_events).into_iter().collect();
            source_sequence.iter().any(|name| successor_sequence.contains(name))
        }
        None => false,
    };

    let equivalent = match &successor_run_id {
        Some(_) if source_had_tool_activity => tool_name_sequence_overlaps,
        Some(_) => true,
        None => false,
    };

    ResumeEquivalenceReport {
        source_run_id: source_run_id.to_string(),
        successor_run_id,
        source_had_tool_activity,
        tool_name_sequence_overlaps,
        equivalent,
    }
}

/// Bundled view combining a run's replay shape with its reexecution
/// comparisons, the unit `reexecute_run` callers typically want to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReexecutionReport {
    pub replay: ReplayReport,
    pub reexecution: Vec<ReexecutionDetail>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_runtime_domain::config::PolicyConfig;
    use sa_runtime_domain::envelope::ToolResult;
    use sa_runtime_tools::{Tool, ToolRegistry};
    use serde_json::json;
    use tempfile::tempdir;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "read_file"
        }
        fn description(&self) -> &str {
            "reads a file"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _arguments: Value) -> ToolResult {
            ToolResult::ok("contents")
        }
    }

    fn runtime_with_tool(dir: &std::path::Path) -> (DeterministicToolRuntime, PolicyEngine) {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool));
        let event_store = EventStore::new(dir.join("events.jsonl"), false).unwrap();
        let policy = PolicyEngine::new(PolicyConfig::default());
        (
            DeterministicToolRuntime::new(registry, event_store, PolicyEngine::new(PolicyConfig::default())),
            policy,
        )
    }

    #[test]
    fn replay_run_flags_missing_start_and_end() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();
        let report = replay_run(&store, "nope");
        assert!(!report.has_start);
        assert!(!report.has_end);
        assert!(!report.deterministic_ok);
    }

    #[tokio::test]
    async fn replay_run_reports_deterministic_ok_for_clean_run() {
        let dir = tempdir().unwrap();
        let (rt, policy) = runtime_with_tool(dir.path());
        let envelope = build_envelope(
            "run-1", "sess-1", "call-1", "read_file", json!({}), &policy, "/workspace", 30, 0, false,
        );
        rt.execute(&envelope).await.unwrap();

        rt.event_store()
            .append(RuntimeEvent::new(
                EventType::RunStarted,
                "run-1",
                "sess-1",
                [
                    ("channel".to_string(), json!("cli")),
                    ("chat_id".to_string(), json!("c1")),
                    ("engine".to_string(), json!("scripted")),
                    ("engine_resolved".to_string(), json!("scripted")),
                ]
                .into_iter()
                .collect(),
            ))
            .unwrap();
        rt.event_store()
            .append(RuntimeEvent::new(
                EventType::RunCompleted,
                "run-1",
                "sess-1",
                [("iterations".to_string(), json!(1)), ("is_error".to_string(), json!(false))]
                    .into_iter()
                    .collect(),
            ))
            .unwrap();

        let report = replay_run(rt.event_store(), "run-1");
        assert!(report.has_start);
        assert!(report.has_end);
        assert!(report.duplicate_requests.is_empty());
        assert!(report.orphan_starts.is_empty());
        assert!(report.deterministic_ok);
    }

    #[tokio::test]
    async fn reexecute_run_matches_successful_read_only_call() {
        let dir = tempdir().unwrap();
        let (rt, policy) = runtime_with_tool(dir.path());
        let envelope = build_envelope(
            "run-1", "sess-1", "call-1", "read_file", json!({}), &policy, "/workspace", 30, 0, false,
        );
        rt.execute(&envelope).await.unwrap();

        let details = reexecute_run(rt.event_store(), &rt, &policy, "run-1", "sess-1", "/workspace", false)
            .await
            .unwrap();

        assert_eq!(details.len(), 1);
        assert!(!details[0].skipped);
        assert_eq!(details[0].recorded_success, Some(true));
        assert_eq!(details[0].reexecuted_success, Some(true));
        assert_eq!(details[0].output_hash_matches, Some(true));
        assert!(!details[0].mismatched);
    }

    #[tokio::test]
    async fn reexecute_run_skips_elevated_calls() {
        let dir = tempdir().unwrap();
        let (rt, policy) = runtime_with_tool(dir.path());
        let mut envelope = build_envelope(
            "run-1", "sess-1", "call-1", "read_file", json!({}), &policy, "/workspace", 30, 0, false,
        );
        envelope.execution_mode = ExecutionMode::Elevated;
        envelope.approved = true;
        rt.execute(&envelope).await.unwrap();

        let details = reexecute_run(rt.event_store(), &rt, &policy, "run-1", "sess-1", "/workspace", true)
            .await
            .unwrap();

        assert_eq!(details.len(), 1);
        assert!(details[0].skipped);
    }

    #[test]
    fn resume_equivalence_false_when_no_successor_found() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();
        let report = verify_resume_equivalence(&store, "run-1");
        assert!(report.successor_run_id.is_none());
        assert!(!report.equivalent);
    }

    #[test]
    fn resume_equivalence_true_when_tool_sequences_overlap() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();

        store
            .append(RuntimeEvent::new(
                EventType::ToolRequested,
                "run-1",
                "sess-1",
                [
                    ("tool_call_id".to_string(), json!("c1")),
                    ("tool_name".to_string(), json!("read_file")),
                    ("arguments".to_string(), json!({})),
                    ("execution_mode".to_string(), json!("read_only")),
                ]
                .into_iter()
                .collect(),
            ))
            .unwrap();

        store
            .append(RuntimeEvent::new(
                EventType::RunStarted,
                "run-2",
                "sess-1",
                [
                    ("channel".to_string(), json!("cli")),
                    ("chat_id".to_string(), json!("c1")),
                    ("engine".to_string(), json!("scripted")),
                    ("engine_resolved".to_string(), json!("scripted")),
                    ("recovery_resume_from".to_string(), json!("run-1")),
                ]
                .into_iter()
                .collect(),
            ))
            .unwrap();
        store
            .append(RuntimeEvent::new(
                EventType::ToolRequested,
                "run-2",
                "sess-1",
                [
                    ("tool_call_id".to_string(), json!("c2")),
                    ("tool_name".to_string(), json!("read_file")),
                    ("arguments".to_string(), json!({})),
                    ("execution_mode".to_string(), json!("read_only")),
                ]
                .into_iter()
                .collect(),
            ))
            .unwrap();

        let report = verify_resume_equivalence(&store, "run-1");
        assert_eq!(report.successor_run_id.as_deref(), Some("run-2"));
        assert!(report.tool_name_sequence_overlaps);
        assert!(report.equivalent);
    }
}
