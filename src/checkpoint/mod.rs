//! Durable record of workflow progress.
//!
//! One record per working directory, stored as pretty JSON in the OUTPUT
//! directory. The flow executor is the only writer.

use crate::error::{ErrorCode, Result, TomoflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;


/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// File name of the record inside the OUTPUT directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Key-value state carried between steps and across restarts
pub type WorkflowState = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Completed,
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointStatus::InProgress => f.write_str("in progress"),
            CheckpointStatus::Completed => f.write_str("completed"),
        }
    }
}

/// Progress after the most recently completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub workflow: String,
    pub last_completed_step: String,
    pub pass: usize,
    #[serde(default)]
    pub state: WorkflowState,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
    pub run_id: Uuid,
}

impl CheckpointRecord {
    pub fn new(
        workflow: impl Into<String>,
        last_completed_step: impl Into<String>,
        pass: usize,
        state: WorkflowState,
        run_id: Uuid,
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            workflow: workflow.into(),
            last_completed_step: last_completed_step.into(),
            pass,
            state,
            status: CheckpointStatus::InProgress,
            updated_at: Utc::now(),
            run_id,
        }
    }

    pub fn completed(mut self) -> Self {
        self.status = CheckpointStatus::Completed;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == CheckpointStatus::Completed
    }
}

/// Reads and writes the checkpoint record for one working directory
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Store keeping its record in `dir`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CHECKPOINT_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the record; readers see either the old or the new record
    ///
    /// The record goes to a uniquely named sibling file, is synced to disk,
    /// then renamed over the old one.
    pub async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error("failed to create checkpoint directory", e))?;
        }

        let json = serde_json::to_string_pretty(record).map_err(|e| {
            TomoflowError::checkpoint_io_with_code(
                ErrorCode::CHECKPOINT_SERIALIZATION_ERROR,
                "failed to serialize checkpoint",
                Some(self.path.clone()),
            )
            .with_source(e)
        })?;

        let temp_path = self.path.with_file_name(format!(
            "{}.{}.tmp",
            CHECKPOINT_FILE,
            Uuid::new_v4().simple()
        ));
        let written = match self.write_synced(&temp_path, json.as_bytes()).await {
            Ok(()) => fs::rename(&temp_path, &self.path)
                .await
                .map_err(|e| self.io_error("failed to move checkpoint to final location", e)),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                debug!("Could not remove {}: {}", temp_path.display(), cleanup);
            }
            return Err(e);
        }
        self.sync_directory().await;

        debug!(
            "Saved checkpoint for {} at step {} (pass {})",
            record.workflow, record.last_completed_step, record.pass
        );
        Ok(())
    }

    async fn write_synced(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| self.io_error("failed to create checkpoint temp file", e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| self.io_error("failed to write checkpoint to temp file", e))?;
        file.sync_all()
            .await
            .map_err(|e| self.io_error("failed to sync checkpoint temp file", e))?;
        Ok(())
    }

    /// Persist the rename itself; a failure here leaves a valid record behind
    async fn sync_directory(&self) {
        if let Some(parent) = self.path.parent() {
            let synced = match fs::File::open(parent).await {
                Ok(dir) => dir.sync_all().await,
                Err(e) => Err(e),
            };
            if let Err(e) = synced {
                debug!("Could not sync {}: {}", parent.display(), e);
            }
        }
    }

    /// Read the record; `None` when no run has checkpointed yet
    pub async fn load(&self) -> Result<Option<CheckpointRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error("failed to read checkpoint file", e))?;

        let record: CheckpointRecord = serde_json::from_str(&content).map_err(|e| {
            TomoflowError::checkpoint_io_with_code(
                ErrorCode::CHECKPOINT_CORRUPTED,
                "failed to parse checkpoint",
                Some(self.path.clone()),
            )
            .with_source(e)
        })?;

        if record.version > CHECKPOINT_VERSION {
            return Err(TomoflowError::checkpoint_io_with_code(
                ErrorCode::CHECKPOINT_INCOMPATIBLE_VERSION,
                format!(
                    "checkpoint version {} is newer than supported version {}",
                    record.version, CHECKPOINT_VERSION
                ),
                Some(self.path.clone()),
            ));
        }

        Ok(Some(record))
    }

    /// Remove the record; returns whether one existed
    pub async fn clear(&self) -> Result<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        fs::remove_file(&self.path)
            .await
            .map_err(|e| self.io_error("failed to remove checkpoint", e))?;
        info!("Removed checkpoint {}", self.path.display());
        Ok(true)
    }

    fn io_error(&self, message: &str, source: std::io::Error) -> TomoflowError {
        TomoflowError::checkpoint_io(message, Some(self.path.clone())).with_source(source)
    }
}
