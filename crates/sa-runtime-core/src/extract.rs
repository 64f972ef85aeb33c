//! Tool-call extraction (§4.9 step 5, §9): a small parser with explicit
//! precedence over an LLM response — native structured calls first, then
//! inline XML, then fenced JSON blocks — deduped by id.
//!
//! Grounded on `clawlet/agent/loop.py::AgentLoop._extract_tool_calls`,
//! extended with the native-`tool_calls` precedence tier the distilled spec
//! adds ahead of the original's regex-only extraction.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use sa_runtime_domain::tool::ToolCall;

fn xml_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<tool_call\s+name="([^"]+)"\s+arguments='([^']*)'\s*/?>"#)
            .expect("static pattern")
    })
}

fn fenced_json_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)```json\s*\n(?:tool_call)?\s*\n?(.*?)\n```").expect("static pattern")
    })
}

/// Extract tool calls from a complete assistant response, in priority order:
/// native structured calls (already parsed by the provider adapter) first,
/// then inline XML, then fenced JSON blocks containing `{name, arguments}`.
/// Results are merged and deduped by `id`; malformed payloads are ignored
/// rather than failing the turn.
pub fn extract_tool_calls(native: &[ToolCall], content: &str) -> Vec<ToolCall> {
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut merged = Vec::new();

    for call in native {
        if seen_ids.insert(call.id.clone()) {
            merged.push(call.clone());
        }
    }

    for (i, caps) in xml_pattern().captures_iter(content).enumerate() {
        let name = caps[1].to_string();
        let args_str = &caps[2];
        let Ok(arguments) = serde_json::from_str::<serde_json::Value>(args_str) else {
            tracing::warn!(args = %args_str, "failed to parse XML tool_call arguments");
            continue;
        };
        let id = format!("xml_{i}");
        if seen_ids.insert(id.clone()) {
            merged.push(ToolCall { id, name, arguments });
        }
    }

    for (i, caps) in fenced_json_pattern().captures_iter(content).enumerate() {
        let json_str = caps[1].trim();
        let Ok(data) = serde_json::from_str::<serde_json::Value>(json_str) else {
            continue;
        };
        let Some(obj) = data.as_object() else { continue };
        let Some(name) = obj.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let arguments = obj
            .get("arguments")
            .or_else(|| obj.get("parameters"))
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let id = format!("call_json_{i}");
        if seen_ids.insert(id.clone()) {
            merged.push(ToolCall {
                id,
                name: name.to_string(),
                arguments,
            });
        }
    }

    merged
}

/// Heuristic tool-arming check (§4.9 step 4): does the user's message carry
/// actionable cues — imperative verbs, URLs, shell-like tokens, or
/// skill/install/search keywords — that suggest tools should be offered to
/// the provider this turn.
pub fn should_arm_tools(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();

    const IMPERATIVE_VERBS: &[&str] = &[
        "list", "read", "write", "edit", "run", "execute", "delete", "create",
        "search", "find", "fetch", "download", "install", "check", "show",
        "open", "remove", "update", "build", "test",
    ];
    if IMPERATIVE_VERBS
        .iter()
        .any(|v| lower.split_whitespace().next() == Some(v) || lower.contains(&format!(" {v} ")))
    {
        return true;
    }

    if lower.contains("http://") || lower.contains("https://") {
        return true;
    }

    const SHELL_TOKENS: &[&str] = &["$(", "&&", "||", "sudo ", "| grep", "./", "rm -"];
    if SHELL_TOKENS.iter().any(|t| lower.contains(t)) {
        return true;
    }

    const KEYWORDS: &[&str] = &["skill", "install", "search for", "web search"];
    KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Whether the final reply content reads as a first-person commitment to do
/// more work later (§4.9 autonomous follow-up) rather than a finished
/// answer or a question awaiting the user.
pub fn is_autonomous_commitment(content: &str) -> bool {
    let lower = content.to_ascii_lowercase();
    if lower.trim_end().ends_with('?') {
        return false;
    }
    const MARKERS: &[&str] = &[
        "i will ", "i'll ", "let me ", "i'm going to ", "i am going to ", "next, i",
    ];
    MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_xml_tool_call() {
        let content = r#"Sure, <tool_call name="list_dir" arguments='{"path": "."}'/>"#;
        let calls = extract_tool_calls(&[], content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_dir");
        assert_eq!(calls[0].arguments["path"], ".");
    }

    #[test]
    fn extracts_fenced_json_block() {
        let content = "Let's do this:\n```json\n{\"name\": \"read_file\", \"arguments\": {\"path\": \"a.txt\"}}\n```";
        let calls = extract_tool_calls(&[], content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn native_calls_take_precedence_and_dedupe_by_id() {
        let native = vec![ToolCall {
            id: "call_0".into(),
            name: "native_tool".into(),
            arguments: serde_json::json!({}),
        }];
        let content = r#"<tool_call name="xml_tool" arguments='{}'/>"#;
        let calls = extract_tool_calls(&native, content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "native_tool");
        assert_eq!(calls[1].name, "xml_tool");
    }

    #[test]
    fn malformed_xml_arguments_are_ignored_not_fatal() {
        let content = r#"<tool_call name="broken" arguments='{not json}'/>"#;
        let calls = extract_tool_calls(&[], content);
        assert!(calls.is_empty());
    }

    #[test]
    fn no_tool_calls_in_plain_text() {
        let calls = extract_tool_calls(&[], "Just a plain reply.");
        assert!(calls.is_empty());
    }

    #[test]
    fn arms_tools_on_imperative_verb() {
        assert!(should_arm_tools("list files in ."));
        assert!(should_arm_tools("Please read the README"));
    }

    #[test]
    fn arms_tools_on_url() {
        assert!(should_arm_tools("check out https://example.com"));
    }

    #[test]
    fn does_not_arm_tools_on_plain_greeting() {
        assert!(!should_arm_tools("Hello there, how are you?"));
    }

    #[test]
    fn commitment_marker_without_question_is_autonomous() {
        assert!(is_autonomous_commitment("I'll go ahead and check the logs now."));
        assert!(!is_autonomous_commitment("Should I check the logs?"));
        assert!(!is_autonomous_commitment("The logs look fine."));
    }
}
