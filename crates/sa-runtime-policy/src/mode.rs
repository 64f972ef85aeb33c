//! Mode inference and authorization (§4.2).

use std::sync::OnceLock;

use regex::Regex;
use sa_runtime_domain::config::PolicyConfig;
use sa_runtime_domain::envelope::ExecutionMode;

/// Tools whose effect on the workspace is read-only; never requires
/// elevated authorization.
const READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "list_dir",
    "search_files",
    "web_search",
    "fetch_url",
    "list_skills",
    "recall_memory",
    "search_memory",
];

/// Tools that mutate the workspace but are not considered dangerous.
const WRITE_TOOLS: &[&str] = &[
    "write_file",
    "edit_file",
    "apply_patch",
    "remember",
    "forget",
    "install_skill",
];

/// Shell command substrings that always escalate a `shell` call to
/// `elevated`, regardless of the configured default mode.
fn elevated_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\brm\b",
            r"\bchmod\b",
            r"\bchown\b",
            r"\bgit\s+reset\b",
            r"\bgit\s+clean\b",
            r"\bdd\b",
            r"\bmkfs\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static pattern"))
        .collect()
    })
}

/// Result of an authorization check (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: String,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Pure function of `(tool_name, arguments)` to execution mode, plus the
/// authorization predicate `(mode, approved) -> decision`.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Infer the execution mode a tool call falls under (§4.2 mode inference
    /// rules). Unknown tools fall back to `config.default_mode`.
    pub fn infer_mode(&self, tool_name: &str, arguments: &serde_json::Value) -> ExecutionMode {
        let name = tool_name.trim().to_ascii_lowercase();

        if READ_ONLY_TOOLS.contains(&name.as_str()) {
            return ExecutionMode::ReadOnly;
        }
        if WRITE_TOOLS.contains(&name.as_str()) {
            return ExecutionMode::WorkspaceWrite;
        }
        if name == "shell" {
            let command = arguments
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase();
            if elevated_patterns().iter().any(|p| p.is_match(&command)) {
                return ExecutionMode::Elevated;
            }
            return ExecutionMode::WorkspaceWrite;
        }
        self.config.default_mode
    }

    /// Authorize a mode that has already been inferred (§4.2 authorization
    /// rule). `approved` corresponds to `ToolCallEnvelope::approved`.
    pub fn authorize(&self, mode: ExecutionMode, approved: bool) -> PolicyDecision {
        if !self.config.allowed_modes.contains(&mode) {
            return PolicyDecision::deny(format!(
                "Mode '{mode}' is not allowed by runtime policy"
            ));
        }
        if self.config.require_approval.contains(&mode) && !approved {
            return PolicyDecision::deny("Elevated mode requires explicit approval");
        }
        PolicyDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_runtime_domain::config::PolicyConfig;
    use serde_json::json;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default())
    }

    #[test]
    fn read_only_tools_infer_read_only() {
        let e = engine();
        assert_eq!(
            e.infer_mode("read_file", &json!({})),
            ExecutionMode::ReadOnly
        );
        assert_eq!(
            e.infer_mode("search_memory", &json!({})),
            ExecutionMode::ReadOnly
        );
    }

    #[test]
    fn write_tools_infer_workspace_write() {
        let e = engine();
        assert_eq!(
            e.infer_mode("write_file", &json!({})),
            ExecutionMode::WorkspaceWrite
        );
    }

    #[test]
    fn shell_with_dangerous_command_infers_elevated() {
        let e = engine();
        assert_eq!(
            e.infer_mode("shell", &json!({"command": "rm -rf /"})),
            ExecutionMode::Elevated
        );
        assert_eq!(
            e.infer_mode("shell", &json!({"command": "git reset --hard"})),
            ExecutionMode::Elevated
        );
    }

    #[test]
    fn shell_with_benign_command_infers_workspace_write() {
        let e = engine();
        assert_eq!(
            e.infer_mode("shell", &json!({"command": "ls -la"})),
            ExecutionMode::WorkspaceWrite
        );
    }

    #[test]
    fn unknown_tool_falls_back_to_default_mode() {
        let mut cfg = PolicyConfig::default();
        cfg.default_mode = ExecutionMode::ReadOnly;
        let e = PolicyEngine::new(cfg);
        assert_eq!(
            e.infer_mode("some_unregistered_tool", &json!({})),
            ExecutionMode::ReadOnly
        );
    }

    #[test]
    fn elevated_without_approval_is_denied() {
        let e = engine();
        let decision = e.authorize(ExecutionMode::Elevated, false);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "Elevated mode requires explicit approval");
    }

    #[test]
    fn elevated_with_approval_is_allowed() {
        let e = engine();
        let decision = e.authorize(ExecutionMode::Elevated, true);
        assert!(decision.allowed);
    }

    #[test]
    fn mode_outside_allowed_set_is_denied() {
        let mut cfg = PolicyConfig::default();
        cfg.allowed_modes.remove(&ExecutionMode::WorkspaceWrite);
        let e = PolicyEngine::new(cfg);
        let decision = e.authorize(ExecutionMode::WorkspaceWrite, false);
        assert!(!decision.allowed);
    }
}
