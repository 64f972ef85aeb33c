//! Runtime core: the components that turn inbound messages into model
//! calls and tool dispatches — the Message Bus (C7), Outbound Rate Limiter
//! (C6), Provider boundary, Deterministic Tool Runtime (C5), Agent Loop
//! (C9), and Replay/Reexecution (C11).
//!
//! Everything here depends on `sa-runtime-domain`, `sa-runtime-policy`,
//! `sa-runtime-tools`, and `sa-runtime-store`; the gateway binary is the
//! sole caller of this crate.

pub mod agent;
pub mod bus;
pub mod error;
pub mod extract;
pub mod provider;
pub mod ratelimit;
pub mod replay;
pub mod runtime;

pub use agent::{AgentLoop, IdentityProvider, StaticIdentity};
pub use bus::{BusStats, InboundMessage, MessageBus, OutboundMessage};
pub use error::{Result, RuntimeError};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, ScriptedProvider};
pub use ratelimit::{CheckResult, KeyStats, LimiterStats, OutboundRateLimiter};
pub use replay::{ReexecutionDetail, ReplayReexecutionReport, ReplayReport, ResumeEquivalenceReport};
pub use runtime::{build_envelope, DeterministicToolRuntime, ToolExecutionMetadata};
