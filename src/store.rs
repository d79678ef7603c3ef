//! Saved patterns: an ordered list of named grids persisted as JSON.
//!
//! Loading never fails. Missing, unreadable or corrupt data yields an
//! empty store and a warning; only saving reports errors.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::pattern::Pattern;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPattern {
    pub name: String,
    pub pattern: Pattern,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternStore {
    entries: Vec<SavedPattern>,
}

impl PatternStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse stored data, discarding it if it is corrupt.
    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str(json) {
            Ok(store) => store,
            Err(e) => {
                log::warn!("discarding corrupt saved patterns: {e}");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("cannot read saved patterns at {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Write the store to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        fs::write(path, self.to_json()?).map_err(io_err)
    }

    /// Save a pattern under `name`. Blank names are ignored.
    pub fn add(&mut self, name: &str, pattern: Pattern) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.entries.push(SavedPattern {
            name: name.to_string(),
            pattern,
        });
        true
    }

    pub fn remove(&mut self, index: usize) -> Option<SavedPattern> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// The first pattern saved under `name`.
    pub fn get(&self, name: &str) -> Option<&Pattern> {
        self.entries
            .iter()
            .find(|e| e.name == name.trim())
            .map(|e| &e.pattern)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SavedPattern> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `<data dir>/drumgrid/patterns.json` for the current platform.
    #[cfg(feature = "dirs")]
    pub fn default_path() -> Option<std::path::PathBuf> {
        directories::ProjectDirs::from("", "", "drumgrid").map(|dirs| dirs.data_dir().join("patterns.json"))
    }
}
