//! Persistence layer: the append-only Event Store (C1), the per-session
//! transcript Storage Backend (C10), and the Recovery Manager (C8).
//!
//! Everything here is file-backed and depends only on `sa-runtime-domain`;
//! the agent loop and runtime in `sa-runtime-core` are the sole callers.

pub mod event_store;
pub mod recovery;
pub mod storage;

pub use event_store::EventStore;
pub use recovery::{RecoveryManager, ResumeMessage, RunCheckpoint};
pub use storage::{JsonlStorageBackend, StorageBackend, StoredMessage};
