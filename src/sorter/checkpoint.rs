use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use tracing::info;
use crate::constants::CHECKPOINT_FILE_NAME;

/// Resumable progress of a sorting run.
///
/// The first six fields keep the names used by `state.json` files written by
/// earlier releases, so those files still load. The file position fields are
/// optional in the JSON and default to "nothing consumed yet".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub total_processed: u64,
    pub email_counts: BTreeMap<String, u64>,
    pub config_usage_count: u64,
    pub api_request_count: u64,
    #[serde(default)]
    pub invalid_emails: Vec<String>,
    #[serde(default)]
    pub other_emails: Vec<String>,
    #[serde(default)]
    pub completed_files: Vec<PathBuf>,
    #[serde(default)]
    pub current_file: Option<PathBuf>,
    #[serde(default)]
    pub current_file_lines: u64,
}

impl ProcessingState {
    pub fn record_bucket(&mut self, bucket: &str) -> u64 {
        *self.email_counts.entry(bucket.to_string()).or_insert(0) += 1;
        self.total_processed += 1;
        self.total_processed
    }

    pub fn counts_consistent(&self) -> bool {
        self.email_counts.values().sum::<u64>() == self.total_processed
    }

    pub fn is_file_completed(&self, path: &Path) -> bool {
        self.completed_files.iter().any(|p| p == path)
    }

    /// Lines of `path` already consumed by a previous run.
    pub fn lines_to_skip(&self, path: &Path) -> u64 {
        match &self.current_file {
            Some(current) if current == path => self.current_file_lines,
            _ => 0,
        }
    }

    pub fn begin_file(&mut self, path: &Path) {
        if self.current_file.as_deref() != Some(path) {
            self.current_file = Some(path.to_path_buf());
            self.current_file_lines = 0;
        }
    }

    pub fn mark_file_completed(&mut self, path: &Path) {
        if !self.is_file_completed(path) {
            self.completed_files.push(path.to_path_buf());
        }
        self.current_file = None;
        self.current_file_lines = 0;
    }
}

/// Durable JSON snapshot of a [`ProcessingState`] at a fixed path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(state_directory: &Path) -> Self {
        Self {
            path: state_directory.join(CHECKPOINT_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn save(&self, state: &ProcessingState) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        }

        // Write-then-rename so a crash mid-write leaves the previous snapshot intact
        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string(state)?;
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write checkpoint {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace checkpoint {}", self.path.display()))?;

        info!("Saved state to {} ({} processed)", self.path.display(), state.total_processed);
        Ok(())
    }

    /// Returns `None` when no checkpoint exists. A checkpoint that exists but
    /// cannot be read or parsed is an error, never an empty state.
    pub fn load(&self) -> Result<Option<ProcessingState>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read checkpoint {}", self.path.display())
                })
            }
        };

        let state: ProcessingState = serde_json::from_str(&content).with_context(|| {
            format!(
                "Checkpoint {} is corrupt; fix or remove it before resuming",
                self.path.display()
            )
        })?;

        Ok(Some(state))
    }

    pub fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove checkpoint {}", self.path.display())
            }),
        }
    }
}
