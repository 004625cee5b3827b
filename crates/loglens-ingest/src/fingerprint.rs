//! Content fingerprints for detecting rewritten files.
//!
//! The registry only knows how many lines a file produced, so a file that is
//! truncated and written again looks like one that is simply up to date. The
//! [`FingerprintStore`] remembers a hash of each file's leading bytes and a
//! line-count baseline; when the head no longer matches, the baseline moves to
//! the current remote count and the file is read from the start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::types::FileId;

const STATE_FILE: &str = "fingerprints.json";

/// Hash of a file's leading bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Number of bytes hashed.
    pub head_len: usize,
    /// Hex-encoded blake3 hash of those bytes.
    pub head_hash: String,
}

impl Fingerprint {
    /// Fingerprints the given head bytes.
    #[must_use]
    pub fn of(head: &[u8]) -> Self {
        Self {
            head_len: head.len(),
            head_hash: blake3::hash(head).to_hex().to_string(),
        }
    }

    /// Returns true if `head` starts with the bytes this fingerprint covers.
    #[must_use]
    pub fn matches(&self, head: &[u8]) -> bool {
        head.get(..self.head_len)
            .is_some_and(|prefix| blake3::hash(prefix).to_hex().as_str() == self.head_hash)
    }
}

/// Local state kept for one tracked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Fingerprint at the end of the last scan.
    pub fingerprint: Fingerprint,
    /// Remote line count at which the current content started.
    pub baseline: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredState {
    file_id: FileId,
    #[serde(flatten)]
    state: FileState,
}

/// Fingerprint store, in memory or backed by a JSON file.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<FileId, FileState>>,
}

impl FingerprintStore {
    /// Creates a store that is never written to disk.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store in `state_dir`, loading any previous state.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the state file
    /// exists but cannot be parsed.
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(STATE_FILE);

        let mut entries = HashMap::new();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let stored: Vec<StoredState> = serde_json::from_str(&content)?;
            entries.extend(stored.into_iter().map(|s| (s.file_id, s.state)));
        }
        debug!(path = %path.display(), count = entries.len(), "loaded fingerprints");

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    /// Returns the state recorded for a file.
    #[must_use]
    pub fn get(&self, file_id: FileId) -> Option<FileState> {
        self.entries.read().get(&file_id).cloned()
    }

    /// Records a file's state.
    pub fn record(&self, file_id: FileId, state: FileState) {
        self.entries.write().insert(file_id, state);
    }

    /// Number of tracked files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if no file is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the store to disk. A no-op for in-memory stores.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut stored: Vec<StoredState> = self
            .entries
            .read()
            .iter()
            .map(|(file_id, state)| StoredState {
                file_id: *file_id,
                state: state.clone(),
            })
            .collect();
        stored.sort_by_key(|s| s.file_id);
        let content = serde_json::to_vec_pretty(&stored)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!(path = %path.display(), count = stored.len(), "flushed fingerprints");
        Ok(())
    }
}
