#![deny(warnings)]

//! Persistence boundary: the opaque save blob and the `Storage`
//! collaborator.
//!
//! Saves are best-effort local JSON. Every sub-object is optional so a
//! partial or older blob loads cleanly, with each engine falling back to
//! its own defaults. Storage failures never escape: they are logged and
//! reported as `None`/`false`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sim_core::GameState;
use sim_market::MarketSnapshot;
use sim_production::ProductionEngine;
use sim_research::ResearchSnapshot;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// The single opaque blob written by autosave and manual saves.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveData {
    pub game_state: Option<GameState>,
    pub production: Option<ProductionEngine>,
    pub research: Option<ResearchSnapshot>,
    pub market: Option<MarketSnapshot>,
    /// Wall-clock time of the save, used to project offline progress.
    pub last_update: Option<DateTime<Utc>>,
}

/// Failures at the storage boundary; always caught before the tick loop.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("save io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt save blob: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Best-effort blob store.
///
/// `load` returns `None` both for "no save yet" and for unreadable
/// blobs; `save` reports success so callers can surface a failed manual
/// save without interrupting the loop.
pub trait Storage {
    fn load(&self) -> Option<SaveData>;
    fn save(&mut self, data: &SaveData) -> bool;
}

/// JSON file-backed storage.
#[derive(Clone, Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_load(&self) -> Result<Option<SaveData>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let blob = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&blob)?))
    }

    fn try_save(&self, data: &SaveData) -> Result<(), StorageError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(&self.path, serde_json::to_string(data)?)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn load(&self) -> Option<SaveData> {
        match self.try_load() {
            Ok(data) => data,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to load save, starting fresh");
                None
            }
        }
    }

    fn save(&mut self, data: &SaveData) -> bool {
        match self.try_save(data) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.path.display(), %err, "failed to write save");
                false
            }
        }
    }
}

/// In-memory storage for tests and throwaway sessions. Goes through the
/// same JSON encoding as the file store.
#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    blob: Option<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load(&self) -> Option<SaveData> {
        let blob = self.blob.as_ref()?;
        match serde_json::from_str(blob) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(%err, "corrupt in-memory save");
                None
            }
        }
    }

    fn save(&mut self, data: &SaveData) -> bool {
        match serde_json::to_string(data) {
            Ok(blob) => {
                self.blob = Some(blob);
                true
            }
            Err(err) => {
                warn!(%err, "failed to encode save");
                false
            }
        }
    }
}
