//! Event Store (C1, §4.1): append-only `RuntimeEvent` log keyed by `run_id`,
//! plus deterministic per-run signatures.
//!
//! The JSONL file is the durable source of truth; the in-memory side is a
//! bounded ring of recent events plus a `run_id -> logical sequence numbers`
//! index, so `iter`/`signature` never need a linear scan of the file for
//! runs still resident in memory — mirroring the ring-buffer-plus-index
//! pattern this codebase already uses for run tracking (`runtime/runs.rs`).

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use sa_runtime_domain::error::{Error, Result};
use sa_runtime_domain::event::RuntimeEvent;

/// Bound on how many events are kept resident in memory. Older events are
/// still on disk; `iter`/`signature` fall back to a file scan when a run's
/// events have aged out of the ring.
const MAX_EVENTS_IN_MEMORY: usize = 20_000;

/// Payload fields redacted when `redact` is enabled (§4.1).
const REDACTED_FIELDS: &[&str] = &["output", "stdout", "stderr"];
const REDACTION_SENTINEL: &str = "[redacted]";

struct Inner {
    /// Bounded ring of recent events (oldest first).
    ring: VecDeque<RuntimeEvent>,
    /// run_id -> logical sequence numbers of its events still in `ring`.
    index: HashMap<String, Vec<usize>>,
    /// Logical sequence number of `ring`'s front element.
    base_seq: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            ring: VecDeque::new(),
            index: HashMap::new(),
            base_seq: 0,
        }
    }

    fn push(&mut self, event: RuntimeEvent) {
        let seq = self.base_seq + self.ring.len();
        self.index
            .entry(event.run_id.clone())
            .or_default()
            .push(seq);
        self.ring.push_back(event);

        while self.ring.len() > MAX_EVENTS_IN_MEMORY {
            if let Some(evicted) = self.ring.pop_front() {
                self.base_seq += 1;
                if let Some(seqs) = self.index.get_mut(&evicted.run_id) {
                    seqs.retain(|&s| s != self.base_seq - 1);
                    if seqs.is_empty() {
                        self.index.remove(&evicted.run_id);
                    }
                }
            }
        }
    }

    fn deque_idx(&self, seq: usize) -> Option<usize> {
        seq.checked_sub(self.base_seq)
    }

    /// Events for `run_id` currently resident in the ring, in append order.
    /// Returns `None` if the run has no events in memory (caller should
    /// fall back to a file scan).
    fn events_for(&self, run_id: &str) -> Option<Vec<RuntimeEvent>> {
        let seqs = self.index.get(run_id)?;
        Some(
            seqs.iter()
                .filter_map(|&seq| self.deque_idx(seq))
                .filter_map(|idx| self.ring.get(idx))
                .cloned()
                .collect(),
        )
    }
}

/// Append-only event log (C1). One instance is shared process-wide; writes
/// are serialized by `inner`'s mutex (§4.1: "internal mutual-exclusion
/// primitive").
pub struct EventStore {
    log_path: PathBuf,
    redact: bool,
    inner: Mutex<Inner>,
}

impl EventStore {
    pub fn new(log_path: impl Into<PathBuf>, redact: bool) -> Result<Self> {
        let log_path = log_path.into();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        Ok(Self {
            log_path,
            redact,
            inner: Mutex::new(Inner::new()),
        })
    }

    /// Append an event. Atomic with respect to other appenders via the
    /// internal mutex; fails with [`Error::Io`] if the log cannot be
    /// written (callers map this to `StorageFailed`, §4.1).
    pub fn append(&self, event: RuntimeEvent) -> Result<()> {
        let normalized = self.normalize(event);
        let line = canonical_json(&normalized)?;

        let mut inner = self.inner.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(Error::Io)?;
        writeln!(file, "{line}").map_err(Error::Io)?;
        inner.push(normalized);
        Ok(())
    }

    /// Events in append order; a missing run returns an empty sequence.
    /// When `limit` is set, only the most recent `limit` events (across the
    /// whole store, `run_id` absent) or for the given run are returned.
    pub fn iter(&self, run_id: Option<&str>, limit: Option<usize>) -> Vec<RuntimeEvent> {
        let events = match run_id {
            Some(run_id) => {
                let cached = self.inner.lock().events_for(run_id);
                cached.unwrap_or_else(|| self.scan_file(Some(run_id)))
            }
            None => {
                let inner = self.inner.lock();
                if inner.base_seq == 0 {
                    inner.ring.iter().cloned().collect()
                } else {
                    drop(inner);
                    self.scan_file(None)
                }
            }
        };

        match limit {
            Some(limit) if events.len() > limit => events[events.len() - limit..].to_vec(),
            _ => events,
        }
    }

    /// Hex digest of a cryptographic hash over the canonical serialization
    /// of every event for `run_id`, in append order. Stable under repeated
    /// computation and independent of whether the events came from the
    /// in-memory ring or a file scan (E1).
    pub fn signature(&self, run_id: &str) -> Result<String> {
        use sha2::{Digest, Sha256};

        let events = self.iter(Some(run_id), None);
        let canonical_values: Result<Vec<serde_json::Value>> = events
            .iter()
            .map(|e| serde_json::to_value(e).map_err(Error::Json))
            .collect();
        let canonical_values = canonical_values?;
        let joined = serde_json::to_string(&canonical_values).map_err(Error::Json)?;

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn normalize(&self, mut event: RuntimeEvent) -> RuntimeEvent {
        if self.redact {
            for field in REDACTED_FIELDS {
                if event.payload.contains_key(*field) {
                    event
                        .payload
                        .insert((*field).to_string(), serde_json::json!(REDACTION_SENTINEL));
                }
            }
        }
        event
    }

    fn scan_file(&self, run_id: Option<&str>) -> Vec<RuntimeEvent> {
        let Ok(content) = std::fs::read_to_string(&self.log_path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter_map(|line| serde_json::from_str::<RuntimeEvent>(line).ok())
            .filter(|e| run_id.map_or(true, |r| e.run_id == r))
            .collect()
    }
}

/// Serialize `event` with sorted keys and stable (compact) separators
/// (§4.1, §6). `serde_json::Map` defaults to a `BTreeMap` backing (this
/// workspace never enables the `preserve_order` feature), so converting
/// through `Value` already yields alphabetically sorted keys at every
/// nesting level — no custom formatter is needed.
fn canonical_json(event: &RuntimeEvent) -> Result<String> {
    let value = serde_json::to_value(event).map_err(Error::Json)?;
    serde_json::to_string(&value).map_err(Error::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_runtime_domain::event::EventType;
    use serde_json::json;
    use tempfile::tempdir;

    fn event(event_type: EventType, run_id: &str) -> RuntimeEvent {
        let mut payload = serde_json::Map::new();
        payload.insert("channel".into(), json!("cli"));
        payload.insert("chat_id".into(), json!("c1"));
        payload.insert("engine".into(), json!("native"));
        payload.insert("engine_resolved".into(), json!("native"));
        RuntimeEvent::new(event_type, run_id, "sess-1", payload)
    }

    #[test]
    fn append_and_iter_round_trip() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();
        store.append(event(EventType::RunStarted, "run-1")).unwrap();
        store
            .append(event(EventType::RunCompleted, "run-1"))
            .unwrap();

        let events = store.iter(Some("run-1"), None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::RunStarted);
        assert_eq!(events[1].event_type, EventType::RunCompleted);
    }

    #[test]
    fn missing_run_returns_empty() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();
        assert!(store.iter(Some("nope"), None).is_empty());
    }

    #[test]
    fn signature_is_idempotent_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::new(&path, false).unwrap();
            store.append(event(EventType::RunStarted, "run-1")).unwrap();
            store
                .append(event(EventType::RunCompleted, "run-1"))
                .unwrap();
        }
        let sig1 = EventStore::new(&path, false).unwrap().signature("run-1").unwrap();
        let store2 = EventStore::new(&path, false).unwrap();
        let sig2 = store2.signature("run-1").unwrap();
        let sig3 = store2.signature("run-1").unwrap();
        assert_eq!(sig1, sig2);
        assert_eq!(sig2, sig3);
    }

    #[test]
    fn redaction_replaces_sensitive_fields_without_changing_shape() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), true).unwrap();
        let mut ev = event(EventType::ToolCompleted, "run-1");
        ev.payload.insert("output".into(), json!("super secret"));
        store.append(ev).unwrap();

        let events = store.iter(Some("run-1"), None);
        assert_eq!(
            events[0].payload.get("output").and_then(|v| v.as_str()),
            Some(REDACTION_SENTINEL)
        );
        assert!(events[0].payload.contains_key("output"));
    }

    #[test]
    fn redaction_changes_signature_deterministically() {
        let dir = tempdir().unwrap();
        let unredacted = EventStore::new(dir.path().join("a.jsonl"), false).unwrap();
        let redacted = EventStore::new(dir.path().join("b.jsonl"), true).unwrap();

        let mut ev = event(EventType::ToolCompleted, "run-1");
        ev.payload.insert("output".into(), json!("x"));
        unredacted.append(ev.clone()).unwrap();
        redacted.append(ev).unwrap();

        assert_ne!(
            unredacted.signature("run-1").unwrap(),
            redacted.signature("run-1").unwrap()
        );
    }

    #[test]
    fn iter_respects_limit_keeping_most_recent() {
        let dir = tempdir().unwrap();
        let store = EventStore::new(dir.path().join("events.jsonl"), false).unwrap();
        for _ in 0..5 {
            store.append(event(EventType::ToolRequested, "run-1")).unwrap();
        }
        let events = store.iter(Some("run-1"), Some(2));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn falls_back_to_file_scan_once_evicted_from_ring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::new(&path, false).unwrap();
        store.append(event(EventType::RunStarted, "run-old")).unwrap();
        for i in 0..MAX_EVENTS_IN_MEMORY {
            store
                .append(event(EventType::ToolRequested, &format!("filler-{i}")))
                .unwrap();
        }
        let events = store.iter(Some("run-old"), None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::RunStarted);
    }
}
