//! Persisted sync state
//!
//! Stores the sync code and history as one JSON document:
//!
//! ```json
//! { "syncCode": "happy-cat-482", "history": [ { "id": "…", "text": "…", "timestamp": 0, "source": "local" } ] }
//! ```
//!
//! A missing file or a missing `history` field reads as empty, so existing
//! history is never wiped by an upgrade.

use super::HistoryItem;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("State file I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("State file '{path}' is malformed: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub sync_code: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryItem>,
}

/// JSON file holding the [`PersistedState`].
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state, or the empty state if the file does not exist.
    pub fn load(&self) -> Result<PersistedState, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PersistedState::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&contents).map_err(|source| StoreError::Serialization {
            path: self.path.clone(),
            source,
        })
    }

    /// Write the state, creating parent directories as needed.
    pub fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let contents =
            serde_json::to_string_pretty(state).map_err(|source| StoreError::Serialization {
                path: self.path.clone(),
                source,
            })?;

        // Write-then-rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)
    }

    /// Forget the sync code and all history.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.save(&PersistedState::default())
    }
}
