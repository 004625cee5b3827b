//! The source, file and line registry the pipeline reads from and writes to.
//!
//! This module provides:
//! - [`Registry`] — the narrow interface to the external API
//! - [`HttpRegistry`] — JSON over HTTP
//! - [`MemoryRegistry`] — in-process registry for tests and dry runs
//! - [`cancellable`] — races a registry call against a cancellation token

mod http;
mod memory;

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

pub use http::{HttpRegistry, HttpRegistryConfig};
pub use memory::{MemoryRegistry, RegistryFixture};

use crate::error::{IngestError, Result};
use crate::types::{FileId, HostId, LogFile, LogLine, LogSource, NewLogFile, SourceId};

/// Boxed future returned by [`Registry`] operations.
pub type RegistryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Registry of log sources, files and lines.
///
/// Every call may fail with a transient error; callers scope failures to the
/// source or file being processed.
pub trait Registry: Send + Sync {
    /// Lists the log sources configured for a host.
    fn list_sources_for_host(&self, host_id: HostId) -> RegistryFuture<'_, Vec<LogSource>>;

    /// Lists the files known for a log source.
    fn list_files_for_source(&self, source_id: SourceId) -> RegistryFuture<'_, Vec<LogFile>>;

    /// Registers a newly discovered file.
    fn create_file<'a>(&'a self, file: &'a NewLogFile) -> RegistryFuture<'a, LogFile>;

    /// Updates a file record.
    fn update_file<'a>(&'a self, file: &'a LogFile) -> RegistryFuture<'a, ()>;

    /// Returns how many lines have been stored for a file.
    fn line_count_for_file(&self, file_id: FileId) -> RegistryFuture<'_, i64>;

    /// Stores a parsed line.
    fn create_line<'a>(&'a self, line: &'a LogLine) -> RegistryFuture<'a, LogLine>;
}

/// Runs a registry call unless the token is cancelled first.
///
/// # Errors
///
/// Returns [`IngestError::Cancelled`] if the token fires before the call
/// completes, otherwise the call's own result.
pub async fn cancellable<T>(
    token: &CancellationToken,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = token.cancelled() => Err(IngestError::Cancelled),
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancellable_passes_result_through() {
        let token = CancellationToken::new();
        let result = cancellable(&token, async { Ok(5) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn cancellable_aborts_pending_call() {
        let token = CancellationToken::new();
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            child.cancel();
        });

        let result: Result<()> = cancellable(&token, async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_token_wins_over_ready_call() {
        let token = CancellationToken::new();
        token.cancel();
        let result = cancellable(&token, async { Ok(1) }).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
    }

    #[test]
    fn registry_is_object_safe() {
        fn takes_dyn(_: &dyn Registry) {}
        let registry = MemoryRegistry::new();
        takes_dyn(&registry);
    }
}
