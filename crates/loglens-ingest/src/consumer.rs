//! The consumer side of a pass: drains the queue into the registry.
//!
//! The registry's line count is the only read cursor, so a file's records
//! must be stored without gaps. Once a record is given up on, the rest of that
//! file's records in the pass are deferred and the next pass resumes at the
//! lost line.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::error::{IngestError, Result};
use crate::registry::{Registry, cancellable};
use crate::types::{FileId, LogLine};

/// Target used for records that could not be stored.
pub const DEAD_LETTER_TARGET: &str = "loglens::dead_letter";

/// Counters for one consumer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Records taken off the queue.
    pub received: usize,
    /// Records stored.
    pub persisted: usize,
    /// Records given up on after the last attempt.
    pub dead_lettered: usize,
    /// Records skipped because an earlier record of their file was lost.
    pub deferred: usize,
    /// Failed attempts that were retried.
    pub retries: usize,
    /// Whether the run stopped on cancellation.
    pub cancelled: bool,
}

/// Persists queued lines one at a time, in arrival order.
pub struct Consumer {
    registry: Arc<dyn Registry>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Consumer {
    /// Creates a consumer.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    /// Drains `rx` until the sender is dropped or `token` is cancelled.
    pub async fn run(
        &self,
        mut rx: mpsc::Receiver<LogLine>,
        token: &CancellationToken,
    ) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut broken_files: HashSet<FileId> = HashSet::new();

        loop {
            let line = tokio::select! {
                biased;
                () = token.cancelled() => {
                    stats.cancelled = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(line) => line,
                    None => break,
                },
            };
            stats.received += 1;

            if broken_files.contains(&line.file_id) {
                debug!(file = %line.file_id, "deferring log line until next pass");
                stats.deferred += 1;
                continue;
            }

            match self.persist(&line, token, &mut stats).await {
                Ok(()) => stats.persisted += 1,
                Err(IngestError::Cancelled) => {
                    stats.cancelled = true;
                    break;
                }
                Err(e) => {
                    dead_letter(&line, &e);
                    stats.dead_lettered += 1;
                    broken_files.insert(line.file_id);
                }
            }
        }

        info!(
            received = stats.received,
            persisted = stats.persisted,
            dead_lettered = stats.dead_lettered,
            deferred = stats.deferred,
            cancelled = stats.cancelled,
            "consumer finished"
        );
        stats
    }

    async fn persist(
        &self,
        line: &LogLine,
        token: &CancellationToken,
        stats: &mut ConsumerStats,
    ) -> Result<()> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match cancellable(token, self.registry.create_line(line)).await {
                Ok(stored) => {
                    debug!(file = %line.file_id, id = %stored.id, "stored log line");
                    return Ok(());
                }
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        file = %line.file_id,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "failed to store log line, retrying"
                    );
                    stats.retries += 1;
                    attempt += 1;

                    tokio::select! {
                        biased;
                        () = token.cancelled() => return Err(IngestError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn dead_letter(line: &LogLine, cause: &IngestError) {
    let record =
        serde_json::to_string(line).unwrap_or_else(|e| format!("<unserializable: {e}>"));
    error!(
        target: DEAD_LETTER_TARGET,
        file = %line.file_id,
        source = %line.log_source_id,
        error = %cause,
        record = %record,
        "giving up on log line for this pass"
    );
}
