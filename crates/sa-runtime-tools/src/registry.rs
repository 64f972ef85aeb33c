//! Tool Registry (C4, §4.4): name → tool dispatch with schema validation and
//! a per-tool sliding-window call limit.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sa_runtime_domain::envelope::ToolResult;
use sa_runtime_domain::tool::ToolDefinition;

use crate::schema::validate_arguments;

/// A capability the agent loop/runtime can invoke by name. Tools declare
/// their schema; their execution *mode* is inferred by the policy engine
/// (`sa-runtime-policy`), never self-declared (§6 Tool contract).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn execute(&self, arguments: serde_json::Value) -> ToolResult;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Sliding-window call limiter keyed by tool name, shared by every entry in
/// the registry (§4.4: "configurable N per 60s").
struct SlidingWindowLimiter {
    max_calls: usize,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls,
            window,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut calls = self.calls.lock();
        let entry = calls.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= self.max_calls {
            return false;
        }
        entry.push_back(now);
        true
    }

    fn reset(&self, key: &str) {
        self.calls.lock().remove(key);
    }
}

/// Name → tool dispatch table (§4.4).
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
    limiter: SlidingWindowLimiter,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(10, Duration::from_secs(60))
    }
}

impl ToolRegistry {
    pub fn new(max_calls_per_window: usize, window: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            limiter: SlidingWindowLimiter::new(max_calls_per_window, window),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
    }

    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn all_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn reset_rate_limit(&self, name: &str) {
        self.limiter.reset(name);
    }

    /// Validate arguments against the tool's schema, enforce the per-tool
    /// rate limit, then dispatch. Unknown tools and rate-limit exhaustion
    /// both return an unsuccessful `ToolResult` rather than erroring —
    /// callers (the deterministic tool runtime) classify the error text.
    pub async fn execute(&self, name: &str, arguments: serde_json::Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::failure(format!("Tool not found: {name}"));
        };

        if let Err(reason) = validate_arguments(&tool.parameters_schema(), &arguments) {
            return ToolResult::failure(format!("invalid tool call: {reason}"));
        }

        if !self.limiter.check(name) {
            return ToolResult::failure(format!(
                "rate limit exceeded: too many calls to '{name}' in the current window"
            ));
        }

        tool.execute(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> ToolResult {
            ToolResult::ok(arguments["text"].as_str().unwrap_or("").to_string())
        }
    }

    #[tokio::test]
    async fn unknown_tool_returns_failure_result() {
        let registry = ToolRegistry::default();
        let result = registry.execute("nope", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn schema_violation_returns_failure_result() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool));
        let result = registry.execute("echo", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid tool call"));
    }

    #[tokio::test]
    async fn valid_call_dispatches_to_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(EchoTool));
        let result = registry.execute("echo", json!({"text": "hi"})).await;
        assert!(result.success);
        assert_eq!(result.output, "hi");
    }

    #[tokio::test]
    async fn rate_limit_exhaustion_returns_failure_result() {
        let mut registry = ToolRegistry::new(1, Duration::from_secs(60));
        registry.register(Box::new(EchoTool));
        let first = registry.execute("echo", json!({"text": "a"})).await;
        assert!(first.success);
        let second = registry.execute("echo", json!({"text": "b"})).await;
        assert!(!second.success);
        assert!(second.error.unwrap().contains("rate limit"));
    }

    #[tokio::test]
    async fn reset_rate_limit_allows_further_calls() {
        let mut registry = ToolRegistry::new(1, Duration::from_secs(60));
        registry.register(Box::new(EchoTool));
        let _ = registry.execute("echo", json!({"text": "a"})).await;
        registry.reset_rate_limit("echo");
        let second = registry.execute("echo", json!({"text": "b"})).await;
        assert!(second.success);
    }
}
