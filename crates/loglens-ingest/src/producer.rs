//! The producer side of a pass.
//!
//! One [`Producer::run`] walks every log source of a host, reconciles the
//! files on disk with the registry, and sends each new line onto the bounded
//! queue. Failures are scoped: a broken source or file is logged and skipped,
//! only cancellation or a closed queue ends the pass early.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::cursor::{CursorPlan, FileCursor, PartialTail, TruncationPolicy};
use crate::error::{IngestError, Result};
use crate::fingerprint::{FileState, Fingerprint, FingerprintStore};
use crate::parser::{GroupTracker, LineParser};
use crate::registry::{Registry, cancellable};
use crate::types::{HostId, LogFile, LogLine, LogSource, NewLogFile};

/// Counters for one producer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// Sources returned by the registry, deleted ones included.
    pub sources_seen: usize,
    /// Sources whose directory was walked.
    pub sources_processed: usize,
    /// Sources skipped for configuration reasons.
    pub sources_skipped: usize,
    /// Sources abandoned after a registry or I/O failure.
    pub sources_failed: usize,
    /// Files found on disk.
    pub files_seen: usize,
    /// File records created in the registry.
    pub files_created: usize,
    /// Files with nothing new.
    pub files_up_to_date: usize,
    /// Files that had new lines.
    pub files_read: usize,
    /// Files skipped after an error.
    pub files_failed: usize,
    /// Files whose registry count exceeded their line count.
    pub files_truncated: usize,
    /// Files whose leading bytes changed since the last scan.
    pub files_rewritten: usize,
    /// Records sent to the queue.
    pub lines_emitted: usize,
    /// Whether the pass stopped early.
    pub cancelled: bool,
}

/// A regular file found in a source directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskFile {
    /// File name within the directory.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Last write time.
    pub modified: SystemTime,
}

/// Lists the regular files of a directory, oldest write time first.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub async fn list_directory(dir: &Path) -> std::io::Result<Vec<DiskFile>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        files.push(DiskFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    files.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Walks a host's log sources and emits new lines.
pub struct Producer {
    registry: Arc<dyn Registry>,
    fingerprints: Arc<FingerprintStore>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Producer {
    /// Creates a producer.
    #[must_use]
    pub fn new(
        registry: Arc<dyn Registry>,
        fingerprints: Arc<FingerprintStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            fingerprints,
            config,
        }
    }

    /// Runs one pass for `host_id`, sending records on `tx`.
    ///
    /// The sender is dropped when the pass ends, which lets the consumer
    /// finish draining.
    pub async fn run(
        &self,
        host_id: HostId,
        tx: mpsc::Sender<LogLine>,
        token: &CancellationToken,
    ) -> PassStats {
        let mut stats = PassStats::default();

        let sources = match cancellable(token, self.registry.list_sources_for_host(host_id)).await {
            Ok(sources) => sources,
            Err(IngestError::Cancelled) => {
                stats.cancelled = true;
                return stats;
            }
            Err(e) => {
                error!(host = %host_id, error = %e, "failed to list log sources");
                return stats;
            }
        };
        stats.sources_seen = sources.len();
        info!(host = %host_id, sources = sources.len(), "starting producer pass");

        for source in &sources {
            if source.deleted {
                debug!(source = %source.name, "skipping deleted log source");
                continue;
            }
            if token.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            match self.process_source(source, &tx, token, &mut stats).await {
                Ok(()) => stats.sources_processed += 1,
                Err(IngestError::Cancelled) => {
                    stats.cancelled = true;
                    break;
                }
                Err(IngestError::QueueClosed) => {
                    warn!(source = %source.name, "record queue closed, ending pass");
                    stats.cancelled = true;
                    break;
                }
                Err(e) if e.is_configuration_error() => {
                    warn!(
                        source = %source.name,
                        path = %source.path,
                        error = %e,
                        "skipping log source"
                    );
                    stats.sources_skipped += 1;
                }
                Err(e) => {
                    error!(
                        source = %source.name,
                        path = %source.path,
                        error = %e,
                        "log source failed"
                    );
                    stats.sources_failed += 1;
                }
            }
        }

        if let Err(e) = self.fingerprints.flush().await {
            warn!(error = %e, "failed to save fingerprints");
        }

        info!(
            host = %host_id,
            processed = stats.sources_processed,
            files = stats.files_seen,
            lines = stats.lines_emitted,
            cancelled = stats.cancelled,
            "producer pass finished"
        );
        stats
    }

    async fn process_source(
        &self,
        source: &LogSource,
        tx: &mpsc::Sender<LogLine>,
        token: &CancellationToken,
        stats: &mut PassStats,
    ) -> Result<()> {
        let provider = source
            .active_provider()
            .ok_or_else(|| IngestError::MissingProvider(source.name.clone()))?;
        let parser = LineParser::for_provider(provider)?;

        let mut known = cancellable(token, self.registry.list_files_for_source(source.id)).await?;
        let on_disk = list_directory(Path::new(&source.path))
            .await
            .map_err(|e| IngestError::UnreadableDirectory {
                path: source.path.clone(),
                source: e,
            })?;

        info!(
            source = %source.name,
            provider = parser.provider(),
            files = on_disk.len(),
            "scanning log source"
        );

        // Only the newest file can still be mid-write.
        let newest = on_disk.len().saturating_sub(1);
        for (index, disk) in on_disk.iter().enumerate() {
            if token.is_cancelled() {
                return Err(IngestError::Cancelled);
            }
            stats.files_seen += 1;

            let tail = if index == newest {
                PartialTail::Hold
            } else {
                PartialTail::Include
            };
            match self
                .process_file(source, &parser, disk, tail, &mut known, tx, token, stats)
                .await
            {
                Ok(()) => {}
                Err(e @ (IngestError::Cancelled | IngestError::QueueClosed)) => return Err(e),
                Err(e) => {
                    error!(source = %source.name, file = %disk.name, error = %e, "skipping file");
                    stats.files_failed += 1;
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_file(
        &self,
        source: &LogSource,
        parser: &LineParser,
        disk: &DiskFile,
        tail: PartialTail,
        known: &mut Vec<LogFile>,
        tx: &mpsc::Sender<LogLine>,
        token: &CancellationToken,
        stats: &mut PassStats,
    ) -> Result<()> {
        let existing = known.iter().find(|f| f.file_name == disk.name).cloned();
        let (file, created) = match existing {
            Some(file) if file.deleted => {
                debug!(file = %disk.name, "skipping deleted log file");
                return Ok(());
            }
            Some(file) => (file, false),
            None => {
                let file = self.register_file(source, &disk.name, known, token).await?;
                stats.files_created += 1;
                (file, true)
            }
        };

        let remote = if created {
            0
        } else {
            cancellable(token, self.registry.line_count_for_file(file.id)).await?
        };

        let cursor = FileCursor::read(&disk.path, self.config.fingerprint_bytes, tail).await?;
        if cursor.held_back() > 0 {
            debug!(file = %disk.name, bytes = cursor.held_back(), "last line not finished yet");
        }
        let (plan, baseline) = self.plan_scan(&file, &cursor, remote, stats);

        let Some(skip) = plan else {
            stats.files_up_to_date += 1;
            self.mark_complete(&file, token).await?;
            self.remember(&file, &cursor, baseline);
            return Ok(());
        };

        let new_lines = cursor.lines_from(skip);
        debug!(
            file = %disk.name,
            remote,
            on_disk = cursor.line_count(),
            new = new_lines.len(),
            "reading new lines"
        );

        let mut groups = GroupTracker::new();
        for raw in new_lines {
            let line = parser
                .parse(&mut groups, raw)
                .into_log_line(file.id, source.id, &self.config.created_by);

            tokio::select! {
                biased;
                () = token.cancelled() => return Err(IngestError::Cancelled),
                sent = tx.send(line) => sent.map_err(|_| IngestError::QueueClosed)?,
            }
            stats.lines_emitted += 1;
        }
        stats.files_read += 1;

        self.mark_complete(&file, token).await?;
        self.remember(&file, &cursor, baseline);
        Ok(())
    }

    /// Creates a file record and reads it back to learn its id.
    async fn register_file(
        &self,
        source: &LogSource,
        name: &str,
        known: &mut Vec<LogFile>,
        token: &CancellationToken,
    ) -> Result<LogFile> {
        let new_file = NewLogFile {
            log_source_id: source.id,
            file_name: name.to_string(),
            created_by: self.config.created_by.clone(),
        };
        cancellable(token, self.registry.create_file(&new_file)).await?;

        *known = cancellable(token, self.registry.list_files_for_source(source.id)).await?;
        let file = known
            .iter()
            .find(|f| f.file_name == name && !f.deleted)
            .cloned()
            .ok_or_else(|| IngestError::FileNotRegistered(name.to_string()))?;

        info!(source = %source.name, file = name, id = %file.id, "registered new log file");
        Ok(file)
    }

    /// Decides where to start reading. Returns the number of lines to skip,
    /// or `None` when there is nothing to read, plus the baseline to store.
    fn plan_scan(
        &self,
        file: &LogFile,
        cursor: &FileCursor,
        remote: i64,
        stats: &mut PassStats,
    ) -> (Option<usize>, i64) {
        let stored = self.fingerprints.get(file.id);
        let mut baseline = stored.as_ref().map_or(0, |s| s.baseline);

        if let Some(state) = &stored {
            if !state.fingerprint.matches(cursor.head()) {
                warn!(
                    file = %file.file_name,
                    remote,
                    "file content was rewritten, reading from the start"
                );
                stats.files_rewritten += 1;
                baseline = remote;
            }
        }

        let ingested = remote.saturating_sub(baseline).max(0);
        match cursor.plan(ingested) {
            CursorPlan::UpToDate => (None, baseline),
            CursorPlan::Resume { skip } => (Some(skip), baseline),
            CursorPlan::Truncated { ingested, on_disk } => {
                stats.files_truncated += 1;
                match self.config.truncation {
                    TruncationPolicy::Skip => {
                        warn!(
                            file = %file.file_name,
                            ingested,
                            on_disk,
                            "registry holds more lines than the file, treating as read"
                        );
                        (None, baseline)
                    }
                    TruncationPolicy::Reingest => {
                        warn!(
                            file = %file.file_name,
                            ingested,
                            on_disk,
                            "registry holds more lines than the file, reading from the start"
                        );
                        (Some(0), remote)
                    }
                }
            }
        }
    }

    async fn mark_complete(&self, file: &LogFile, token: &CancellationToken) -> Result<()> {
        if file.file_complete {
            return Ok(());
        }

        let updated = LogFile {
            file_complete: true,
            ..file.clone()
        };
        match cancellable(token, self.registry.update_file(&updated)).await {
            Ok(()) => Ok(()),
            Err(IngestError::Cancelled) => Err(IngestError::Cancelled),
            Err(e) => {
                error!(file = %file.file_name, error = %e, "failed to mark log file complete");
                Ok(())
            }
        }
    }

    fn remember(&self, file: &LogFile, cursor: &FileCursor, baseline: i64) {
        self.fingerprints.record(
            file.id,
            FileState {
                fingerprint: Fingerprint::of(cursor.head()),
                baseline,
            },
        );
    }
}
