//! Storage Backend (C10, §4.10): durable key-value abstraction over
//! ordered per-session messages.
//!
//! The shipped backend is a JSON-lines transcript file per `session_id`,
//! consistent with how this codebase already persists per-session
//! transcripts (`sessions::transcript`). The trait is narrow enough that a
//! relational backend could be swapped in without touching the agent loop.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sa_runtime_domain::error::{Error, Result};

/// One persisted message. `seq` stands in for `(created_at, id)` ordering:
/// it is monotonic per session and assigned at append time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub seq: u64,
    pub role: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Durable per-session message log (§4.10).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn store_message(&self, session_id: &str, role: &str, content: &str) -> Result<()>;
    async fn get_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>>;
    async fn health_check(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// JSON-lines transcript file per session under `root`. One file per
/// `session_id`: `<root>/<session_id>.jsonl`, append-only.
pub struct JsonlStorageBackend {
    root: PathBuf,
    /// Guards the monotonic sequence counters; a session's file is the
    /// unit of concurrency but a single process-wide mutex keeps the
    /// counter bookkeeping simple and matches §5's "writes serialize per
    /// session" by serializing across all sessions (acceptable: a single
    /// append is a cheap, non-blocking file write).
    next_seq: Mutex<std::collections::HashMap<String, u64>>,
}

impl JsonlStorageBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_seq: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{session_id}.jsonl"))
    }

    fn next_seq_for(&self, session_id: &str, existing_max: Option<u64>) -> u64 {
        let mut map = self.next_seq.lock();
        let entry = map.entry(session_id.to_string()).or_insert_with(|| {
            existing_max.map(|m| m + 1).unwrap_or(0)
        });
        let seq = *entry;
        *entry += 1;
        seq
    }

    fn read_all(&self, path: &Path) -> Vec<StoredMessage> {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<StoredMessage>(line).ok())
            .collect()
    }
}

#[async_trait::async_trait]
impl StorageBackend for JsonlStorageBackend {
    async fn initialize(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(Error::Io)
    }

    async fn store_message(&self, session_id: &str, role: &str, content: &str) -> Result<()> {
        let path = self.path_for(session_id);
        let existing_max = self.read_all(&path).last().map(|m| m.seq);
        let seq = self.next_seq_for(session_id, existing_max);

        let message = StoredMessage {
            seq,
            role: role.to_string(),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
        };
        let line = serde_json::to_string(&message).map_err(Error::Json)?;

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(Error::Io)?;
        writeln!(file, "{line}").map_err(Error::Io)
    }

    async fn get_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<StoredMessage>> {
        let path = self.path_for(session_id);
        let mut messages = self.read_all(&path);
        messages.sort_by_key(|m| m.seq);
        if let Some(limit) = limit {
            if messages.len() > limit {
                messages = messages.split_off(messages.len() - limit);
            }
        }
        Ok(messages)
    }

    async fn health_check(&self) -> Result<()> {
        if self.root.exists() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "storage root {} does not exist",
                self.root.display()
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn store_and_get_round_trip_in_order() {
        let dir = tempdir().unwrap();
        let backend = JsonlStorageBackend::new(dir.path());
        backend.initialize().await.unwrap();

        backend.store_message("s1", "user", "hi").await.unwrap();
        backend.store_message("s1", "assistant", "hello").await.unwrap();

        let messages = backend.get_messages("s1", None).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert!(messages[0].seq < messages[1].seq);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let dir = tempdir().unwrap();
        let backend = JsonlStorageBackend::new(dir.path());
        backend.initialize().await.unwrap();

        backend.store_message("a", "user", "from a").await.unwrap();
        backend.store_message("b", "user", "from b").await.unwrap();

        let a = backend.get_messages("a", None).await.unwrap();
        let b = backend.get_messages("b", None).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].content, "from a");
        assert_eq!(b[0].content, "from b");
    }

    #[tokio::test]
    async fn get_messages_respects_limit_keeping_most_recent() {
        let dir = tempdir().unwrap();
        let backend = JsonlStorageBackend::new(dir.path());
        backend.initialize().await.unwrap();
        for i in 0..5 {
            backend
                .store_message("s1", "user", &format!("msg-{i}"))
                .await
                .unwrap();
        }
        let messages = backend.get_messages("s1", Some(2)).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "msg-3");
        assert_eq!(messages[1].content, "msg-4");
    }

    #[tokio::test]
    async fn health_check_fails_before_initialize() {
        let dir = tempdir().unwrap();
        let backend = JsonlStorageBackend::new(dir.path().join("missing"));
        assert!(backend.health_check().await.is_err());
    }
}
