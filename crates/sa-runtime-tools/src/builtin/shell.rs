//! `shell` tool: runs a command through `/bin/sh -c`, bounded by a timeout
//! and an output-size cap.
//!
//! Grounded in this workspace's existing `exec` tool (`crates/tools/src/exec.rs`):
//! the dangerous-environment-variable blocklist is carried over verbatim,
//! generalized from the foreground/background process-session model down to
//! the single blocking-call shape the policy-gated runtime needs (background
//! sessions belong to the out-of-scope process-manager surface, not the
//! deterministic tool contract in §4.4).

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sa_runtime_domain::envelope::ToolResult;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::registry::Tool;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

const BLOCKED_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "PATH",
    "HOME",
    "USER",
    "SHELL",
    "SSH_AUTH_SOCK",
    "SSH_AGENT_PID",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PYTHONHOME",
    "NODE_PATH",
    "NODE_OPTIONS",
    "RUBYLIB",
    "RUBYOPT",
    "PERL5LIB",
    "PERL5OPT",
    "CLASSPATH",
    "BASH_ENV",
    "ENV",
    "CDPATH",
    "IFS",
];

fn is_dangerous_env_var(name: &str) -> bool {
    BLOCKED_ENV_VARS.contains(&name.to_ascii_uppercase().as_str())
}

pub struct ShellTool {
    workspace: std::path::PathBuf,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(workspace: impl Into<std::path::PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory with a bounded timeout."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The shell command to execute"},
                "timeout_seconds": {"type": "number", "description": "Optional timeout override"},
            },
            "required": ["command"],
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
        let Some(command) = arguments.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required parameter: command");
        };

        let env: HashMap<String, String> = arguments
            .get("env")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        for key in env.keys() {
            if is_dangerous_env_var(key) {
                return ToolResult::failure(format!(
                    "environment variable '{key}' is blocked by security policy"
                ));
            }
        }

        let timeout = arguments
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .envs(&env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::failure(format!("failed to spawn: {e}")),
        };

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");

        let run = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (_, _, status) = tokio::join!(
                stdout.read_to_end(&mut stdout_buf),
                stderr.read_to_end(&mut stderr_buf),
                child.wait(),
            );
            (stdout_buf, stderr_buf, status)
        };

        let (stdout_buf, stderr_buf, status) = match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return ToolResult::failure(format!(
                    "command timed out after {}s",
                    timeout.as_secs()
                ));
            }
        };

        let status = match status {
            Ok(s) => s,
            Err(e) => return ToolResult::failure(format!("failed to wait for command: {e}")),
        };

        let stdout_text = truncate_utf8(&stdout_buf, MAX_OUTPUT_BYTES);
        let stderr_text = truncate_utf8(&stderr_buf, MAX_OUTPUT_BYTES);

        let mut parts = Vec::new();
        if !stdout_text.trim().is_empty() {
            parts.push(stdout_text.trim().to_string());
        }
        if !stderr_text.trim().is_empty() {
            parts.push(format!("[stderr]\n{}", stderr_text.trim()));
        }
        let output = if parts.is_empty() {
            "(no output)".to_string()
        } else {
            parts.join("\n")
        };

        if status.success() {
            ToolResult {
                success: true,
                output,
                error: None,
                data: Some(json!({"exit_code": status.code()})),
            }
        } else {
            ToolResult {
                success: false,
                output,
                error: Some(format!("Exit code: {}", status.code().unwrap_or(-1))),
                data: Some(json!({"exit_code": status.code()})),
            }
        }
    }
}

fn truncate_utf8(bytes: &[u8], max: usize) -> String {
    let slice = if bytes.len() > max { &bytes[..max] } else { bytes };
    String::from_utf8_lossy(slice).into_owned()
}
