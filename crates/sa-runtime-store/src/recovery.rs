//! Recovery Manager (C8, §4.8): one JSON checkpoint per active `run_id`,
//! written atomically, used to resume an interrupted run on restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sa_runtime_domain::error::{Error, Result};

/// Snapshot of a run's progress, persisted so a restart can resume it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCheckpoint {
    pub run_id: String,
    pub channel: String,
    pub chat_id: String,
    pub session_id: String,
    /// Coarse stage marker: one of `received`, `reasoning`, `tool_executing`,
    /// `replying`, `completed`.
    pub stage: String,
    pub iteration: u32,
    /// The inbound content that started this run, carried so a resume
    /// message can continue the user's actual request rather than a bare
    /// "continue" nudge.
    #[serde(default)]
    pub user_message: String,
    /// Count of tool invocations so far this run, keyed by tool name.
    #[serde(default)]
    pub tool_stats: HashMap<String, u32>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal shape of a synthesized resume message; the agent loop maps this
/// onto its own `InboundMessage` type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeMessage {
    pub channel: String,
    pub chat_id: String,
    pub content: String,
    pub recovery_resume: bool,
    pub recovery_run_id: String,
    pub recovery_stage: String,
    pub recovery_iteration: u32,
}

const RESUME_PREFIX: &str = "Recovery resume: continue from interrupted run ";

/// Checkpoint store: one file per `run_id` under `dir`, `<run_id>.json`.
/// Absence of a file implies the run is complete (§6).
pub struct RecoveryManager {
    dir: PathBuf,
}

impl RecoveryManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        Ok(Self { dir })
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    /// Overwrite the checkpoint for `cp.run_id` via atomic temp-file +
    /// rename, so a crash mid-write never leaves a corrupt checkpoint.
    pub fn save(&self, cp: &RunCheckpoint) -> Result<()> {
        let path = self.path_for(&cp.run_id);
        let tmp_path = self.dir.join(format!("{}.tmp-{}", cp.run_id, std::process::id()));

        let body = serde_json::to_string_pretty(cp).map_err(Error::Json)?;
        std::fs::write(&tmp_path, body).map_err(Error::Io)?;
        std::fs::rename(&tmp_path, &path).map_err(Error::Io)?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<RunCheckpoint>> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(&path).map_err(Error::Io)?;
        serde_json::from_str(&body).map(Some).map_err(Error::Json)
    }

    /// Delete the checkpoint, marking the run as complete. Deleting an
    /// already-absent checkpoint is not an error.
    pub fn mark_completed(&self, run_id: &str) -> Result<()> {
        let path = self.path_for(run_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Active checkpoints, most-recently-updated first, capped at `limit`.
    pub fn list_active(&self, limit: usize) -> Result<Vec<RunCheckpoint>> {
        let mut checkpoints = Vec::new();
        let entries = std::fs::read_dir(&self.dir).map_err(Error::Io)?;
        for entry in entries {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Ok(body) = std::fs::read_to_string(&path) {
                if let Ok(cp) = serde_json::from_str::<RunCheckpoint>(&body) {
                    checkpoints.push(cp);
                }
            }
        }
        checkpoints.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        checkpoints.truncate(limit);
        Ok(checkpoints)
    }

    /// Synthesize a resume message for `run_id`. Returns `None` if there is
    /// no active checkpoint to resume from.
    pub fn build_resume_message(&self, run_id: &str) -> Result<Option<ResumeMessage>> {
        let Some(cp) = self.load(run_id)? else {
            return Ok(None);
        };
        let content = if cp.user_message.is_empty() {
            format!("{RESUME_PREFIX}{run_id}")
        } else {
            format!("{RESUME_PREFIX}{run_id}. Original request: {}", cp.user_message)
        };
        Ok(Some(ResumeMessage {
            channel: cp.channel,
            chat_id: cp.chat_id,
            content,
            recovery_resume: true,
            recovery_run_id: run_id.to_string(),
            recovery_stage: cp.stage,
            recovery_iteration: cp.iteration,
        }))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
