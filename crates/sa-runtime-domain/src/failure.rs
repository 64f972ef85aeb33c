use serde::{Deserialize, Serialize};

/// A classified failure, attached to `ToolFailed`/`ProviderFailed` event
/// payloads. `code` is always a member of [`FailureCode`]'s closed set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub code: FailureCode,
    pub retryable: bool,
    pub category: FailureCategory,
}

impl FailureInfo {
    pub fn new(code: FailureCode, retryable: bool, category: FailureCategory) -> Self {
        Self {
            code,
            retryable,
            category,
        }
    }
}

/// The closed failure taxonomy. No classifier may emit a code outside this
/// set (E4) — adding a new failure path means adding a variant here first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    UnknownError,
    Timeout,
    RateLimited,
    NetworkError,
    NotFound,
    ValidationError,
    PolicyDenied,
    PermissionDenied,
    ProcessFailed,
    ToolError,
    ProviderTimeout,
    ProviderConnectError,
    ProviderReadError,
    ProviderRequestError,
    ProviderRateLimited,
    ProviderServerError,
    ProviderClientError,
    ProviderHttpError,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::UnknownError => "unknown_error",
            FailureCode::Timeout => "timeout",
            FailureCode::RateLimited => "rate_limited",
            FailureCode::NetworkError => "network_error",
            FailureCode::NotFound => "not_found",
            FailureCode::ValidationError => "validation_error",
            FailureCode::PolicyDenied => "policy_denied",
            FailureCode::PermissionDenied => "permission_denied",
            FailureCode::ProcessFailed => "process_failed",
            FailureCode::ToolError => "tool_error",
            FailureCode::ProviderTimeout => "provider_timeout",
            FailureCode::ProviderConnectError => "provider_connect_error",
            FailureCode::ProviderReadError => "provider_read_error",
            FailureCode::ProviderRequestError => "provider_request_error",
            FailureCode::ProviderRateLimited => "provider_rate_limited",
            FailureCode::ProviderServerError => "provider_server_error",
            FailureCode::ProviderClientError => "provider_client_error",
            FailureCode::ProviderHttpError => "provider_http_error",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Unknown,
    Transient,
    Provider,
    Tooling,
    Input,
    Policy,
    Security,
    Execution,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Unknown => "unknown",
            FailureCategory::Transient => "transient",
            FailureCategory::Provider => "provider",
            FailureCategory::Tooling => "tooling",
            FailureCategory::Input => "input",
            FailureCategory::Policy => "policy",
            FailureCategory::Security => "security",
            FailureCategory::Execution => "execution",
        }
    }
}
