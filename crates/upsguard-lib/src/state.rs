//! Durable shutdown history
//!
//! The whole deployment mapping is written in one atomic replace:
//! - serialize to a sibling temp file
//! - fsync it
//! - rename over the previous state file
//!
//! A crash at any point leaves either the old or the new mapping on disk,
//! never a torn file. A missing file means no history yet.

use crate::error::{GuardError, GuardResult};
use crate::models::StateMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Single-writer store for the deployment state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the mapping; an absent file yields an empty mapping
    pub fn load(&self) -> GuardResult<StateMap> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No state file yet, starting with empty history");
                return Ok(StateMap::new());
            }
            Err(e) => {
                return Err(GuardError::PersistenceReadFailed {
                    path: self.path.clone(),
                    message: e.to_string(),
                })
            }
        };

        let state: StateMap =
            serde_json::from_slice(&data).map_err(|e| GuardError::PersistenceReadFailed {
                path: self.path.clone(),
                message: format!("invalid state file: {}", e),
            })?;

        info!(
            path = %self.path.display(),
            deployments = state.len(),
            "Loaded shutdown history"
        );
        Ok(state)
    }

    /// Persist the full mapping atomically
    pub fn save(&self, state: &StateMap) -> GuardResult<()> {
        self.write_atomically(state)
            .map_err(|message| GuardError::PersistenceWriteFailed {
                path: self.path.clone(),
                message,
            })?;

        debug!(
            path = %self.path.display(),
            deployments = state.len(),
            "State persisted"
        );
        Ok(())
    }

    fn write_atomically(&self, state: &StateMap) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
            }
        }

        let json = serde_json::to_vec(state).map_err(|e| format!("failed to serialize: {}", e))?;

        let temp_path = self.temp_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|e| format!("failed to create {}: {}", temp_path.display(), e))?;

        file.write_all(&json)
            .map_err(|e| format!("failed to write {}: {}", temp_path.display(), e))?;
        file.sync_all()
            .map_err(|e| format!("failed to sync {}: {}", temp_path.display(), e))?;

        fs::rename(&temp_path, &self.path).map_err(|e| {
            format!(
                "failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            )
        })
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
