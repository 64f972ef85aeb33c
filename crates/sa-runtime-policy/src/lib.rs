//! Policy Engine (C2) and Failure Classifier (C3).
//!
//! Both are pure, synchronous functions of their inputs — no I/O, no shared
//! mutable state — so the deterministic tool runtime (`sa-runtime-core`) can
//! call them inline without crossing a suspension point.

pub mod failure;
pub mod mode;

pub use failure::{classify_error_text, classify_http_status, FailureClassifier};
pub use mode::{PolicyDecision, PolicyEngine};
