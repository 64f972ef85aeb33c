//! Runtime-specific error shapes (§7, §10.3) that don't belong in the
//! domain crate because they're particular to components living here.

use sa_runtime_domain::error::Error as DomainError;

#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("outbound rate limit exceeded for {channel}:{chat_id}, retry after {retry_after:.1}s")]
    RateLimitExceeded {
        channel: String,
        chat_id: String,
        retry_after: f64,
    },

    #[error("session {0} is busy with another turn")]
    SessionBusy(String),

    #[error("policy denied: {reason}")]
    PolicyDenied { reason: String },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
