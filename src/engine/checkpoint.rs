// SPDX-License-Identifier: MIT

//! Durable per-session checkpoints
//!
//! A checkpoint is the latest merged state plus the next step to
//! execute, keyed by an opaque session id. [`MemorySaver`] keeps
//! checkpoints in process memory; [`FileSaver`] writes one JSON file
//! per session and survives restarts. Writes go through a temp file
//! and rename so a crash never leaves a partially written checkpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::error::PersistenceError;

/// Lifecycle of a session's run, as recorded in its checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Mid-run; `next_step` is the step to execute
    Running,
    /// Paused for fresh caller input; resumes at `next_step`
    Suspended,
    /// Reached the terminal sentinel
    Terminated,
    /// A fatal error stopped the run; `next_step` is the failed step
    Failed,
}

/// Durable snapshot of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub values: BTreeMap<String, Value>,
    pub next_step: Option<String>,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(values: BTreeMap<String, Value>, next_step: Option<String>, status: RunStatus) -> Self {
        Self {
            values,
            next_step,
            status,
            updated_at: Utc::now(),
        }
    }
}

/// Keyed checkpoint store
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, PersistenceError>;

    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), PersistenceError>;

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError>;
}

/// In-process checkpoint store
///
/// Durable for the lifetime of the process only; the default for
/// interactive sessions.
#[derive(Default)]
pub struct MemorySaver {
    sessions: RwLock<HashMap<String, Checkpoint>>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemorySaver {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned())
    }

    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.to_string(), checkpoint.clone());
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        Ok(())
    }
}

/// File-backed checkpoint store, one JSON file per session
pub struct FileSaver {
    dir: PathBuf,
}

impl FileSaver {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        // Session ids are opaque caller strings; keep the file name safe
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl Checkpointer for FileSaver {
    async fn load(&self, session_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        let path = self.session_path(session_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session_id: &str, checkpoint: &Checkpoint) -> Result<(), PersistenceError> {
        let path = self.session_path(session_id);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), PersistenceError> {
        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(next: Option<&str>, status: RunStatus) -> Checkpoint {
        let values = BTreeMap::from([
            ("messages".to_string(), json!(["hi", "there"])),
            ("approved".to_string(), json!(true)),
        ]);
        Checkpoint::new(values, next.map(|s| s.to_string()), status)
    }

    #[tokio::test]
    async fn test_memory_saver_round_trip() {
        let saver = MemorySaver::new();
        assert!(saver.load("s1").await.unwrap().is_none());

        saver
            .save("s1", &checkpoint(Some("check"), RunStatus::Running))
            .await
            .unwrap();

        let loaded = saver.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded.next_step.as_deref(), Some("check"));
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.values["messages"], json!(["hi", "there"]));
    }

    #[tokio::test]
    async fn test_memory_saver_delete() {
        let saver = MemorySaver::new();
        saver
            .save("s1", &checkpoint(None, RunStatus::Terminated))
            .await
            .unwrap();
        saver.delete("s1").await.unwrap();
        assert!(saver.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_saver_isolates_sessions() {
        let saver = MemorySaver::new();
        saver
            .save("a", &checkpoint(Some("step1"), RunStatus::Running))
            .await
            .unwrap();
        saver
            .save("b", &checkpoint(Some("step2"), RunStatus::Running))
            .await
            .unwrap();

        assert_eq!(
            saver.load("a").await.unwrap().unwrap().next_step.as_deref(),
            Some("step1")
        );
        assert_eq!(
            saver.load("b").await.unwrap().unwrap().next_step.as_deref(),
            Some("step2")
        );
    }

    #[tokio::test]
    async fn test_file_saver_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let saver = FileSaver::new(dir.path()).unwrap();
            saver
                .save("thread-1", &checkpoint(Some("answering"), RunStatus::Suspended))
                .await
                .unwrap();
        }

        // A new store instance over the same directory simulates a
        // process restart.
        let reopened = FileSaver::new(dir.path()).unwrap();
        let loaded = reopened.load("thread-1").await.unwrap().unwrap();
        assert_eq!(loaded.next_step.as_deref(), Some("answering"));
        assert_eq!(loaded.status, RunStatus::Suspended);
        assert_eq!(loaded.values["approved"], json!(true));
    }

    #[tokio::test]
    async fn test_file_saver_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSaver::new(dir.path()).unwrap();

        saver
            .save("s", &checkpoint(Some("first"), RunStatus::Running))
            .await
            .unwrap();
        saver
            .save("s", &checkpoint(Some("second"), RunStatus::Running))
            .await
            .unwrap();

        let loaded = saver.load("s").await.unwrap().unwrap();
        assert_eq!(loaded.next_step.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_file_saver_sanitizes_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSaver::new(dir.path()).unwrap();

        saver
            .save("../escape/attempt", &checkpoint(None, RunStatus::Terminated))
            .await
            .unwrap();

        // The file must land inside the store directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(saver.load("../escape/attempt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_saver_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let saver = FileSaver::new(dir.path()).unwrap();
        saver.delete("never-saved").await.unwrap();
    }
}
