//! Side table mapping cache file names to source identities.
//!
//! A file's name is only final once response headers arrive, so the mapping
//! is kept separately rather than derived from the name alone.

use crate::error::{Result, SourceError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

pub(crate) const INDEX_FILE: &str = "index.json";
const INDEX_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    /// file name -> source identity
    entries: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    version: u32,
    entries: &'a BTreeMap<String, String>,
}

pub(crate) struct CacheIndex {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl CacheIndex {
    /// Load the index under `root`; a missing or unreadable index starts empty.
    pub(crate) fn load(root: &Path) -> Self {
        let path = root.join(INDEX_FILE);
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<IndexFile>(&bytes) {
                Ok(file) if file.version == INDEX_VERSION => file.entries,
                Ok(file) => {
                    warn!(version = file.version, "Ignoring cache index with unknown version");
                    BTreeMap::new()
                }
                Err(e) => {
                    warn!(error = %e, "Cache index is corrupt, starting empty");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub(crate) fn file_for(&self, source_id: &str) -> Option<String> {
        self.entries
            .lock()
            .iter()
            .find(|(_, id)| id.as_str() == source_id)
            .map(|(name, _)| name.clone())
    }

    pub(crate) fn source_for(&self, file_name: &str) -> Option<String> {
        self.entries.lock().get(file_name).cloned()
    }

    /// Map `file_name` to `source_id`, replacing older names for that source.
    pub(crate) fn insert(&self, file_name: &str, source_id: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.retain(|name, id| id.as_str() != source_id || name.as_str() == file_name);
        entries.insert(file_name.to_string(), source_id.to_string());
        self.persist(&entries)
    }

    pub(crate) fn remove(&self, file_name: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(file_name).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }

    /// Keep only entries whose file name passes `keep`.
    pub(crate) fn retain(&self, keep: impl Fn(&str) -> bool) -> Result<()> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|name, _| keep(name));
        if entries.len() == before {
            return Ok(());
        }
        self.persist(&entries)
    }

    pub(crate) fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.clear();
        self.persist(&entries)
    }

    /// Callers hold the entries lock so writes land in mutation order.
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let file = IndexFileRef {
            version: INDEX_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| SourceError::Cache(format!("failed to encode index: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
