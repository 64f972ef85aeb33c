//! Shared types for the agent runtime core: the wire-level data model,
//! the closed failure taxonomy, and the construction-time configuration
//! object.
//!
//! This crate has no internal dependencies and performs no I/O; every other
//! `sa-runtime-*` crate depends on it.

pub mod capability;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod failure;
pub mod stream;
pub mod tool;

pub use capability::{LlmCapabilities, ToolSupport};
pub use config::{BusConfig, RuntimeConfig, WorkspaceConfig};
pub use envelope::{ExecutionMode, ToolCallEnvelope, ToolResult};
pub use error::{Error, Result};
pub use event::{EventType, RuntimeEvent};
pub use failure::{FailureCategory, FailureCode, FailureInfo};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
