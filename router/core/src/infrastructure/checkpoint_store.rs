// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! File-based checkpoint store.
//!
//! One JSON document per checkpoint, addressed by checkpoint id. Writes go
//! through a temp file and an atomic rename so a crash mid-write never leaves
//! a torn checkpoint behind. I/O failures surface to the caller; the
//! in-memory tables are never touched on a failed save or load.

use crate::domain::checkpoint::{Checkpoint, CheckpointId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint {0} not found")]
    NotFound(CheckpointId),

    #[error("checkpoint storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Listing entry returned without loading the full snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: CheckpointId,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, id: &CheckpointId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_vec_pretty(checkpoint)?;
        let target = self.path_for(&checkpoint.checkpoint_id);
        let tmp = target.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    pub fn load(&self, id: &CheckpointId) -> Result<Checkpoint, CheckpointStoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Err(CheckpointStoreError::NotFound(*id));
        }
        let raw = fs::read(&path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Summaries of every stored checkpoint, newest first. Unreadable files
    /// are skipped rather than failing the whole listing.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointStoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(summary) = read_summary(&path) {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(summaries)
    }

    /// Removes a stored checkpoint. Returns whether it existed.
    pub fn delete(&self, id: &CheckpointId) -> Result<bool, CheckpointStoreError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

fn read_summary(path: &Path) -> Option<CheckpointSummary> {
    let raw = fs::read(path).ok()?;
    let checkpoint: Checkpoint = serde_json::from_slice(&raw).ok()?;
    Some(CheckpointSummary {
        checkpoint_id: checkpoint.checkpoint_id,
        timestamp: checkpoint.timestamp,
        reason: checkpoint.reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::RouterSnapshot;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let checkpoint = Checkpoint::new("pre-upgrade", RouterSnapshot::default());

        store.save(&checkpoint).unwrap();
        let loaded = store.load(&checkpoint.checkpoint_id).unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        assert!(matches!(
            store.load(&CheckpointId::new()),
            Err(CheckpointStoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let a = Checkpoint::new("first", RouterSnapshot::default());
        let b = Checkpoint::new("second", RouterSnapshot::default());
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);

        assert!(store.delete(&a.checkpoint_id).unwrap());
        assert!(!store.delete(&a.checkpoint_id).unwrap());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_no_tmp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store
            .save(&Checkpoint::new("x", RouterSnapshot::default()))
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
