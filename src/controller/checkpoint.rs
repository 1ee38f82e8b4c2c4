use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AggregateResults, HorizonPlan, ReactorState, StorageState};
use crate::error::CommitmentError;

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Durable run state written after every committed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub format_version: u32,
    pub run_name: String,
    pub saved_at: DateTime<Utc>,
    /// Index of the next window to run.
    pub window_index: usize,
    pub plan: HorizonPlan,
    pub reactor_states: Vec<ReactorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_state: Option<StorageState>,
    pub aggregate: AggregateResults,
}

impl Checkpoint {
    pub fn new(
        run_name: &str,
        window_index: usize,
        plan: HorizonPlan,
        reactor_states: Vec<ReactorState>,
        storage_state: Option<StorageState>,
        aggregate: AggregateResults,
    ) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            run_name: run_name.to_string(),
            saved_at: Utc::now(),
            window_index,
            plan,
            reactor_states,
            storage_state,
            aggregate,
        }
    }
}

/// Owns the checkpoint files of one run: `<run>.checkpoint.json` while the run
/// is in progress, `<run>.checkpoint.completed.json` once it has finished.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    run_name: String,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, run_name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            run_name: run_name.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.checkpoint.json", self.run_name))
    }

    pub fn completed_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.checkpoint.completed.json", self.run_name))
    }

    /// Writes to a unique temporary file, syncs it, renames it over the live
    /// checkpoint and syncs the directory so the rename itself is durable.
    /// A crash leaves either the old or the new file.
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CommitmentError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let bytes = serde_json::to_vec_pretty(checkpoint).map_err(std::io::Error::from)?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", self.run_name, Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, self.path()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        sync_dir(&self.dir).await?;
        info!(
            path = %self.path().display(),
            window_index = checkpoint.window_index,
            periods = checkpoint.aggregate.periods.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Loads the live checkpoint for `plan`. Absent is `None`; anything
    /// unreadable or belonging to another run fails.
    pub async fn load(&self, plan: &HorizonPlan) -> Result<Option<Checkpoint>, CommitmentError> {
        let path = self.path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| CommitmentError::CorruptCheckpoint {
            path: path.clone(),
            reason,
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if checkpoint.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} is not {}",
                checkpoint.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }
        if checkpoint.run_name != self.run_name {
            return Err(corrupt(format!(
                "belongs to run {}, not {}",
                checkpoint.run_name, self.run_name
            )));
        }
        if checkpoint.plan != *plan {
            return Err(corrupt(
                "horizon or window configuration changed since it was written".to_string(),
            ));
        }
        if checkpoint.window_index > plan.window_count() {
            return Err(corrupt(format!(
                "window index {} beyond the {} windows of the horizon",
                checkpoint.window_index,
                plan.window_count()
            )));
        }
        let expected = plan
            .window_start(checkpoint.window_index)
            .min(plan.end_period);
        if checkpoint.aggregate.first_period != plan.first_period
            || checkpoint.aggregate.next_period() != expected
        {
            return Err(corrupt(format!(
                "aggregate ends at period {} but window {} starts at {}",
                checkpoint.aggregate.next_period(),
                checkpoint.window_index,
                expected
            )));
        }
        Ok(Some(checkpoint))
    }

    /// Moves a finished run's checkpoint aside so a rerun starts fresh.
    pub async fn rotate_completed(&self) -> Result<Option<PathBuf>, CommitmentError> {
        let live = self.path();
        if !exists(&live).await? {
            warn!(path = %live.display(), "no checkpoint to rotate");
            return Ok(None);
        }
        let completed = self.completed_path();
        tokio::fs::rename(&live, &completed).await?;
        sync_dir(&self.dir).await?;
        info!(path = %completed.display(), "checkpoint rotated");
        Ok(Some(completed))
    }
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn exists(path: &Path) -> Result<bool, CommitmentError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
