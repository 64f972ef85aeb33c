use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::envelope::ExecutionMode;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The construction-time configuration object the core is built from. This
/// is the already-loaded, already-defaulted struct — parsing an external
/// file format into it is a gateway-binary concern (§10.2), not a core one.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentLimits,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub outbound_rate_limit: RateLimitConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub bus: BusConfig,
}

impl RuntimeConfig {
    /// Structural validation beyond what serde's defaulting already
    /// guarantees. Failures here are fatal at process initialization (§7).
    pub fn validate(&self) -> Result<(), String> {
        if self.agent.max_iterations == 0 {
            return Err("agent.max_iterations must be >= 1".into());
        }
        if self.agent.context_window == 0 {
            return Err("agent.context_window must be >= 1".into());
        }
        if self.outbound_rate_limit.per_minute == 0 || self.outbound_rate_limit.per_hour == 0 {
            return Err("outbound_rate_limit quotas must be positive".into());
        }
        let dirs = [
            &self.storage.event_log_dir,
            &self.storage.checkpoint_dir,
            &self.storage.transcript_dir,
        ];
        for (i, a) in dirs.iter().enumerate() {
            for b in dirs.iter().skip(i + 1) {
                if a == b {
                    return Err(format!(
                        "storage directories must be distinct: {:?} reused",
                        a
                    ));
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "d_provider")]
    pub provider_id: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: d_provider(),
            model: None,
        }
    }
}

fn d_provider() -> String {
    "default".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop limits (C9)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    #[serde(default = "d_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "d_context_window")]
    pub context_window: usize,
    #[serde(default = "d_context_char_budget")]
    pub context_char_budget: usize,
    #[serde(default = "d_max_tool_calls_per_message")]
    pub max_tool_calls_per_message: usize,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_history")]
    pub max_history: usize,
    #[serde(default = "d_autonomous_followup_depth")]
    pub autonomous_followup_depth: u32,
    #[serde(default = "d_provider_retries")]
    pub provider_max_retries: u32,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_iterations: d_max_iterations(),
            context_window: d_context_window(),
            context_char_budget: d_context_char_budget(),
            max_tool_calls_per_message: d_max_tool_calls_per_message(),
            temperature: d_temperature(),
            max_history: d_max_history(),
            autonomous_followup_depth: d_autonomous_followup_depth(),
            provider_max_retries: d_provider_retries(),
        }
    }
}

fn d_max_iterations() -> usize {
    10
}
fn d_context_window() -> usize {
    20
}
fn d_context_char_budget() -> usize {
    16_000
}
fn d_max_tool_calls_per_message() -> usize {
    8
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_history() -> usize {
    100
}
fn d_autonomous_followup_depth() -> u32 {
    1
}
fn d_provider_retries() -> u32 {
    2
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy engine config (C2)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Execution modes the runtime will ever dispatch. Any mode inferred for
    /// a tool call that is absent here is denied outright.
    #[serde(default = "d_allowed_modes")]
    pub allowed_modes: HashSet<ExecutionMode>,
    /// Modes that additionally require `ToolCallEnvelope::approved == true`.
    #[serde(default = "d_require_approval")]
    pub require_approval: HashSet<ExecutionMode>,
    /// Mode assigned to tool names the registry has never seen classified.
    #[serde(default = "d_default_mode")]
    pub default_mode: ExecutionMode,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_modes: d_allowed_modes(),
            require_approval: d_require_approval(),
            default_mode: d_default_mode(),
        }
    }
}

fn d_allowed_modes() -> HashSet<ExecutionMode> {
    [
        ExecutionMode::ReadOnly,
        ExecutionMode::WorkspaceWrite,
        ExecutionMode::Elevated,
    ]
    .into_iter()
    .collect()
}

fn d_require_approval() -> HashSet<ExecutionMode> {
    [ExecutionMode::Elevated].into_iter().collect()
}

fn d_default_mode() -> ExecutionMode {
    ExecutionMode::WorkspaceWrite
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound rate limiter config (C6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "d_per_minute")]
    pub per_minute: u32,
    #[serde(default = "d_per_hour")]
    pub per_hour: u32,
    #[serde(default = "d_rate_limit_mode")]
    pub mode: RateLimitMode,
    #[serde(default = "d_max_tracked_keys")]
    pub max_tracked_keys: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: d_per_minute(),
            per_hour: d_per_hour(),
            mode: d_rate_limit_mode(),
            max_tracked_keys: d_max_tracked_keys(),
        }
    }
}

fn d_per_minute() -> u32 {
    20
}
fn d_per_hour() -> u32 {
    300
}
fn d_rate_limit_mode() -> RateLimitMode {
    RateLimitMode::Lenient
}
fn d_max_tracked_keys() -> usize {
    10_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage / persistence paths (C1, C8, C10)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "d_event_log_dir")]
    pub event_log_dir: PathBuf,
    #[serde(default = "d_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    #[serde(default = "d_transcript_dir")]
    pub transcript_dir: PathBuf,
    /// When set, `output`/`stdout`/`stderr` payload fields are redacted
    /// before being written to the event log (§4.1).
    #[serde(default)]
    pub redact_sensitive_fields: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            event_log_dir: d_event_log_dir(),
            checkpoint_dir: d_checkpoint_dir(),
            transcript_dir: d_transcript_dir(),
            redact_sensitive_fields: false,
        }
    }
}

fn d_event_log_dir() -> PathBuf {
    PathBuf::from("data/events")
}
fn d_checkpoint_dir() -> PathBuf {
    PathBuf::from("data/checkpoints")
}
fn d_transcript_dir() -> PathBuf {
    PathBuf::from("data/transcripts")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace root and message bus sizing (gateway bootstrap, §10.1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory the built-in file/shell tools are rooted at and the
    /// directory stamped onto every `ToolCallEnvelope`.
    #[serde(default = "d_workspace_path")]
    pub path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            path: d_workspace_path(),
        }
    }
}

fn d_workspace_path() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "d_bus_capacity")]
    pub capacity: usize,
    /// How many active checkpoints the gateway resumes on startup (§4.8).
    #[serde(default = "d_resume_limit")]
    pub resume_limit: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: d_bus_capacity(),
            resume_limit: d_resume_limit(),
        }
    }
}

fn d_bus_capacity() -> usize {
    256
}
fn d_resume_limit() -> usize {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = RuntimeConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_max_iterations_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.agent.max_iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reused_storage_directories_rejected() {
        let mut cfg = RuntimeConfig::default();
        cfg.storage.checkpoint_dir = cfg.storage.event_log_dir.clone();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn workspace_path_defaults_to_current_dir() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.workspace.path, PathBuf::from("."));
        assert_eq!(cfg.bus.capacity, 256);
    }

    #[test]
    fn toml_round_trip_preserves_defaults() {
        let cfg = RuntimeConfig::default();
        let text = toml::to_string(&cfg).expect("serialize");
        let parsed: RuntimeConfig = toml::from_str(&text).expect("parse");
        assert_eq!(parsed.agent.max_iterations, cfg.agent.max_iterations);
        assert_eq!(parsed.outbound_rate_limit.per_minute, cfg.outbound_rate_limit.per_minute);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let text = r#"
            [agent]
            max_iterations = 5
        "#;
        let parsed: RuntimeConfig = toml::from_str(text).expect("parse");
        assert_eq!(parsed.agent.max_iterations, 5);
        assert_eq!(parsed.agent.context_window, d_context_window());
    }
}
