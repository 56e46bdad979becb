//! Store Snapshots
//!
//! The full contents of a [`MemoryStore`](super::MemoryStore) as a
//! single pretty-printed JSON file, so the CLI can pick up where the
//! previous invocation left off.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::entity::{Task, TaskHistory, Workflow, WorkflowInstance};
use crate::error::Result;

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub instances: Vec<WorkflowInstance>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub history: Vec<TaskHistory>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    snapshot: Snapshot,
}

impl Snapshot {
    /// Writes the snapshot, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let file = SnapshotFile {
            saved_at: Utc::now(),
            snapshot: self.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;

        info!("Saved state to {}", path.display());
        Ok(())
    }

    /// Reads a snapshot written by [`Snapshot::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&content)?;

        info!(
            "Loaded state from {} (saved {})",
            path.display(),
            file.saved_at.format("%Y-%m-%d %H:%M:%S")
        );
        Ok(file.snapshot)
    }

    /// Loads `path` if it exists, otherwise returns an empty snapshot.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No state at {}; starting empty", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }
}
