//! Failure Classifier (C3, §4.3).
//!
//! Maps a raw error string (or an HTTP-style status code) to a
//! [`FailureInfo`] drawn from the closed taxonomy in `sa-runtime-domain`.
//! Classification is substring/regex heuristics on the lowercased message —
//! no exception-type introspection is available once an error has crossed a
//! crate boundary as a `String`, so callers that still hold a typed HTTP
//! error should prefer [`classify_http_status`].

use sa_runtime_domain::failure::{FailureCategory, FailureCode, FailureInfo};

/// Classify a plain error message using substring heuristics (§4.3).
pub fn classify_error_text(message: &str) -> FailureInfo {
    let text = message.trim().to_ascii_lowercase();

    if text.is_empty() {
        return FailureInfo::new(
            FailureCode::UnknownError,
            false,
            FailureCategory::Unknown,
        );
    }
    if text.contains("timed out") || text.contains("timeout") {
        return FailureInfo::new(FailureCode::Timeout, true, FailureCategory::Transient);
    }
    if text.contains("rate limit") || text.contains("429") {
        return FailureInfo::new(FailureCode::RateLimited, true, FailureCategory::Provider);
    }
    if text.contains("network")
        || text.contains("connection")
        || text.contains("temporarily unavailable")
    {
        return FailureInfo::new(FailureCode::NetworkError, true, FailureCategory::Transient);
    }
    if text.contains("not found") || text.contains("unknown tool") {
        return FailureInfo::new(FailureCode::NotFound, false, FailureCategory::Tooling);
    }
    if text.contains("invalid tool call") || text.contains("validation") {
        return FailureInfo::new(
            FailureCode::ValidationError,
            false,
            FailureCategory::Input,
        );
    }
    if text.contains("requires explicit approval")
        || text.contains("is disabled")
        || text.contains("not allowed by runtime policy")
    {
        return FailureInfo::new(FailureCode::PolicyDenied, false, FailureCategory::Policy);
    }
    if text.contains("permission") || text.contains("access denied") {
        return FailureInfo::new(
            FailureCode::PermissionDenied,
            false,
            FailureCategory::Security,
        );
    }
    if text.contains("exit code:") {
        return FailureInfo::new(
            FailureCode::ProcessFailed,
            false,
            FailureCategory::Execution,
        );
    }

    FailureInfo::new(FailureCode::ToolError, false, FailureCategory::Execution)
}

/// Classify a provider HTTP error by status code (§4.3, §7).
pub fn classify_http_status(status: u16) -> FailureInfo {
    match status {
        429 => FailureInfo::new(
            FailureCode::ProviderRateLimited,
            true,
            FailureCategory::Provider,
        ),
        s if s >= 500 => FailureInfo::new(
            FailureCode::ProviderServerError,
            true,
            FailureCategory::Provider,
        ),
        s if s >= 400 => FailureInfo::new(
            FailureCode::ProviderClientError,
            false,
            FailureCategory::Provider,
        ),
        _ => FailureInfo::new(
            FailureCode::ProviderHttpError,
            false,
            FailureCategory::Provider,
        ),
    }
}

/// Classifies provider-side transport failures that never reached an HTTP
/// response (connect/read/timeout/generic request errors), matching the
/// provider-specific codes §4.3 reserves for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderTransportFailure {
    Timeout,
    ConnectError,
    ReadError,
    RequestError,
}

/// Named classifier type used where the caller wants to pass the classifier
/// around as a value (e.g. stored on a retry loop) rather than calling the
/// free functions directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    pub fn classify_text(&self, message: &str) -> FailureInfo {
        classify_error_text(message)
    }

    pub fn classify_http(&self, status: u16) -> FailureInfo {
        classify_http_status(status)
    }

    pub fn classify_transport(&self, kind: ProviderTransportFailure) -> FailureInfo {
        let code = match kind {
            ProviderTransportFailure::Timeout => FailureCode::ProviderTimeout,
            ProviderTransportFailure::ConnectError => FailureCode::ProviderConnectError,
            ProviderTransportFailure::ReadError => FailureCode::ProviderReadError,
            ProviderTransportFailure::RequestError => FailureCode::ProviderRequestError,
        };
        FailureInfo::new(code, true, FailureCategory::Provider)
    }
}

/// Whether a failure's error text marks it as retryable without needing a
/// full re-classification; used by the deterministic tool runtime's retry
/// loop (§4.5 step 5).
pub fn is_retryable_error_text(message: &str) -> bool {
    let text = message.to_ascii_lowercase();
    ["timeout", "temporarily unavailable", "rate limit", "connection", "network"]
        .iter()
        .any(|marker| text.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_message_is_unknown_non_retryable() {
        let info = classify_error_text("");
        assert_eq!(info.code, FailureCode::UnknownError);
        assert!(!info.retryable);
    }

    #[test]
    fn timeout_marker_is_transient_retryable() {
        let info = classify_error_text("Request timed out after 30s");
        assert_eq!(info.code, FailureCode::Timeout);
        assert!(info.retryable);
        assert_eq!(info.category, FailureCategory::Transient);
    }

    #[test]
    fn rate_limit_marker_is_provider_retryable() {
        let info = classify_error_text("429 rate limit exceeded");
        assert_eq!(info.code, FailureCode::RateLimited);
        assert!(info.retryable);
    }

    #[test]
    fn policy_phrase_is_non_retryable_policy() {
        let info = classify_error_text("Elevated mode requires explicit approval");
        assert_eq!(info.code, FailureCode::PolicyDenied);
        assert!(!info.retryable);
        assert_eq!(info.category, FailureCategory::Policy);
    }

    #[test]
    fn unrecognized_message_is_tool_error() {
        let info = classify_error_text("something went sideways");
        assert_eq!(info.code, FailureCode::ToolError);
        assert!(!info.retryable);
    }

    #[test]
    fn http_429_is_provider_rate_limited_retryable() {
        let info = classify_http_status(429);
        assert_eq!(info.code, FailureCode::ProviderRateLimited);
        assert!(info.retryable);
    }

    #[test]
    fn http_5xx_is_server_error_retryable() {
        let info = classify_http_status(503);
        assert_eq!(info.code, FailureCode::ProviderServerError);
        assert!(info.retryable);
    }

    #[test]
    fn http_4xx_is_client_error_non_retryable() {
        let info = classify_http_status(404);
        assert_eq!(info.code, FailureCode::ProviderClientError);
        assert!(!info.retryable);
    }

    #[test]
    fn is_retryable_error_text_matches_known_markers() {
        assert!(is_retryable_error_text("Connection reset by peer"));
        assert!(!is_retryable_error_text("file not found"));
    }
}
