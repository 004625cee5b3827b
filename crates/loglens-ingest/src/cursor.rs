//! Per-file read progress.
//!
//! Progress is not stored locally: the registry's line count for a file is
//! the cursor. A scan loads the file, counts its non-blank lines and compares
//! that with how many lines the registry already holds. A last line without
//! its newline is not counted until the writer finishes it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What to do when the registry holds more lines than the file has.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationPolicy {
    /// Treat the file as fully read for this pass.
    #[default]
    Skip,
    /// Read the file again from the first line.
    Reingest,
}

/// Outcome of comparing the remote count with the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorPlan {
    /// Every line on disk has been ingested.
    UpToDate,
    /// Lines from index `skip` onwards are new.
    Resume {
        /// Number of leading lines already ingested.
        skip: usize,
    },
    /// The registry holds more lines than the file now has.
    Truncated {
        /// Lines recorded remotely.
        ingested: usize,
        /// Lines currently on disk.
        on_disk: usize,
    },
}

/// Handling of a last line that has no terminating newline yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PartialTail {
    /// Leave it for a later scan; the writer may still be appending.
    #[default]
    Hold,
    /// Treat it as a complete line.
    Include,
}

/// A snapshot of one file's readable lines.
#[derive(Debug, Clone, Default)]
pub struct FileCursor {
    lines: Vec<String>,
    head: Vec<u8>,
    held_back: usize,
}

impl FileCursor {
    /// Reads the whole file, keeping up to `head_len` leading bytes for
    /// fingerprinting.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub async fn read(path: &Path, head_len: usize, tail: PartialTail) -> Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(&bytes, head_len, tail))
    }

    /// Builds a cursor from file content. Blank lines are dropped; invalid
    /// UTF-8 is replaced rather than rejected.
    ///
    /// With [`PartialTail::Hold`], bytes after the last `\n` are neither
    /// counted nor hashed.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], head_len: usize, tail: PartialTail) -> Self {
        let complete = match tail {
            PartialTail::Include => bytes,
            PartialTail::Hold => bytes
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(&bytes[..0], |last| &bytes[..=last]),
        };

        let lines = String::from_utf8_lossy(complete)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();

        Self {
            lines,
            head: complete[..complete.len().min(head_len)].to_vec(),
            held_back: bytes.len() - complete.len(),
        }
    }

    /// Bytes of an unterminated last line left for a later scan.
    #[must_use]
    pub const fn held_back(&self) -> usize {
        self.held_back
    }

    /// Number of non-blank lines on disk.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Leading bytes of the file.
    #[must_use]
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    /// Decides which lines are new given the registry's count.
    #[must_use]
    pub fn plan(&self, ingested: i64) -> CursorPlan {
        let ingested = usize::try_from(ingested).unwrap_or(0);
        let on_disk = self.line_count();

        match ingested.cmp(&on_disk) {
            std::cmp::Ordering::Equal => CursorPlan::UpToDate,
            std::cmp::Ordering::Less => CursorPlan::Resume { skip: ingested },
            std::cmp::Ordering::Greater => CursorPlan::Truncated { ingested, on_disk },
        }
    }

    /// Lines starting at `skip`, in file order.
    #[must_use]
    pub fn lines_from(&self, skip: usize) -> &[String] {
        self.lines.get(skip..).unwrap_or_default()
    }
}
