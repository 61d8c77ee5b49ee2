//! Checkpoint persistence.

use crate::error::{RunnerError, RunnerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use treadle_abstraction::ParamState;

/// Name of the per-directory state file naming the latest checkpoint.
pub const STATE_FILE_NAME: &str = "checkpoint-state.json";

const CHECKPOINT_SUFFIX: &str = ".ckpt.json";

/// Payload of a single checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointData {
    pub global_step: u64,
    pub created_at: DateTime<Utc>,
    pub params: ParamState,
}

/// One entry in the per-directory checkpoint state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub path: PathBuf,
    pub global_step: u64,
    pub created_at: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CheckpointStateFile {
    latest: Option<PathBuf>,
    entries: Vec<CheckpointEntry>,
}

/// Persists parameter snapshots under a path prefix and tracks the
/// history of saved checkpoint locations.
///
/// Checkpoints are written to `<prefix>-<global_step>.ckpt.json`; a
/// `checkpoint-state.json` in the same directory records the latest
/// checkpoint and per-checkpoint digests, so a later process can resolve
/// and verify what an earlier one saved.
#[derive(Debug)]
pub struct Saver {
    prefix: PathBuf,
    max_to_keep: usize,
    last_checkpoints: Vec<PathBuf>,
}

impl Saver {
    /// Creates a saver writing under `prefix`, keeping 5 checkpoints.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into(), max_to_keep: 5, last_checkpoints: Vec::new() }
    }

    /// Caps the on-disk checkpoint history; the oldest are deleted first.
    #[must_use]
    pub fn with_max_to_keep(mut self, max_to_keep: usize) -> Self {
        self.max_to_keep = max_to_keep.max(1);
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Paths of checkpoints saved by this saver, oldest first.
    #[must_use]
    pub fn last_checkpoints(&self) -> &[PathBuf] {
        &self.last_checkpoints
    }

    fn dir(&self) -> PathBuf {
        match self.prefix.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn state_path(&self) -> PathBuf {
        self.dir().join(STATE_FILE_NAME)
    }

    fn checkpoint_path(&self, global_step: u64) -> PathBuf {
        let mut name = self.prefix.clone().into_os_string();
        name.push(format!("-{global_step}{CHECKPOINT_SUFFIX}"));
        PathBuf::from(name)
    }

    fn read_state(&self) -> RunnerResult<CheckpointStateFile> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(CheckpointStateFile::default());
        }
        let bytes = fs::read(&path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_state(&self, state: &CheckpointStateFile) -> RunnerResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(self.state_path(), json)?;
        Ok(())
    }

    /// Writes a checkpoint of `params` taken at `global_step`.
    ///
    /// Re-saving the same step replaces the earlier file in the history
    /// instead of duplicating it.
    pub fn save(&mut self, params: &ParamState, global_step: u64) -> RunnerResult<PathBuf> {
        fs::create_dir_all(self.dir())?;

        let path = self.checkpoint_path(global_step);
        let data = CheckpointData { global_step, created_at: Utc::now(), params: params.clone() };
        fs::write(&path, serde_json::to_string(&data)?)?;

        let mut state = self.read_state()?;
        state.entries.retain(|entry| entry.path != path);
        state.entries.push(CheckpointEntry {
            path: path.clone(),
            global_step,
            created_at: data.created_at,
            sha256: sha256_file(&path)?,
        });

        self.last_checkpoints.retain(|p| p != &path);
        self.last_checkpoints.push(path.clone());
        self.prune(&mut state);

        state.latest = Some(path.clone());
        self.write_state(&state)?;

        info!(path = %path.display(), global_step, "saved checkpoint");
        Ok(path)
    }

    fn prune(&mut self, state: &mut CheckpointStateFile) {
        while self.last_checkpoints.len() > self.max_to_keep {
            let stale = self.last_checkpoints.remove(0);
            state.entries.retain(|entry| entry.path != stale);
            match fs::remove_file(&stale) {
                Ok(()) => debug!(path = %stale.display(), "removed stale checkpoint"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %stale.display(), error = %e, "failed to remove stale checkpoint"),
            }
        }
    }

    /// Resolves the most recent checkpoint, from this saver's history or
    /// from the state file left by a previous process.
    pub fn latest_checkpoint(&self) -> RunnerResult<Option<PathBuf>> {
        if let Some(path) = self.last_checkpoints.last() {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
        }
        let state = self.read_state()?;
        Ok(state.latest.filter(|path| path.exists()))
    }

    /// Entries recorded in the state file, oldest first.
    pub fn list_entries(&self) -> RunnerResult<Vec<CheckpointEntry>> {
        Ok(self.read_state()?.entries)
    }

    /// Reads a checkpoint back, verifying its digest when the state file
    /// has one for it.
    pub fn restore(&self, path: &Path) -> RunnerResult<CheckpointData> {
        if !path.exists() {
            return Err(RunnerError::Checkpoint(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
        let state = self.read_state()?;
        if let Some(entry) = state.entries.iter().find(|entry| entry.path == path) {
            let digest = sha256_file(path)?;
            if digest != entry.sha256 {
                return Err(RunnerError::Checkpoint(format!(
                    "digest mismatch for {}",
                    path.display()
                )));
            }
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// SHA-256 digest of a file, hex encoded.
pub fn sha256_file(path: &Path) -> RunnerResult<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_params(bias: f32) -> ParamState {
        let mut params = ParamState::new();
        params.insert("layer0/weights", vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        params.insert("layer0/biases", vec![2], vec![bias, -bias]);
        params
    }

    #[test]
    fn test_save_then_restore_roundtrips() {
        let temp = TempDir::new().unwrap();
        let mut saver = Saver::new(temp.path().join("model"));

        let path = saver.save(&sample_params(0.5), 10).unwrap();
        assert!(path.exists());

        let data = saver.restore(&path).unwrap();
        assert_eq!(data.global_step, 10);
        assert_eq!(data.params, sample_params(0.5));
    }

    #[test]
    fn test_history_pruned_to_max_to_keep() {
        let temp = TempDir::new().unwrap();
        let mut saver = Saver::new(temp.path().join("model")).with_max_to_keep(2);

        let first = saver.save(&sample_params(0.1), 1).unwrap();
        let second = saver.save(&sample_params(0.2), 2).unwrap();
        let third = saver.save(&sample_params(0.3), 3).unwrap();

        assert_eq!(saver.last_checkpoints(), &[second.clone(), third.clone()]);
        assert!(!first.exists());
        assert!(second.exists());
        assert!(third.exists());

        let entries = saver.list_entries().unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_latest_checkpoint_survives_new_saver() {
        let temp = TempDir::new().unwrap();
        let prefix = temp.path().join("model");

        let mut saver = Saver::new(&prefix);
        let path = saver.save(&sample_params(1.0), 7).unwrap();

        let fresh = Saver::new(&prefix);
        assert!(fresh.last_checkpoints().is_empty());
        assert_eq!(fresh.latest_checkpoint().unwrap(), Some(path));
    }

    #[test]
    fn test_restore_detects_tampering() {
        let temp = TempDir::new().unwrap();
        let mut saver = Saver::new(temp.path().join("model"));

        let path = saver.save(&sample_params(1.0), 1).unwrap();
        fs::write(&path, "{\"global_step\":1}").unwrap();

        let err = saver.restore(&path).unwrap_err();
        assert!(matches!(err, RunnerError::Checkpoint(_)));
    }

    #[test]
    fn test_resaving_a_step_does_not_duplicate_history() {
        let temp = TempDir::new().unwrap();
        let mut saver = Saver::new(temp.path().join("model"));

        saver.save(&sample_params(0.1), 5).unwrap();
        saver.save(&sample_params(0.2), 5).unwrap();

        assert_eq!(saver.last_checkpoints().len(), 1);
        assert_eq!(saver.list_entries().unwrap().len(), 1);
    }
}
