//! In-process registry.
//!
//! Holds sources, files and lines in memory. Used by the test suites and by
//! the agent's dry-run mode, where a JSON fixture describes the sources.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{Registry, RegistryFuture};
use crate::error::{IngestError, Result};
use crate::types::{
    FileId, HostId, LineId, LogFile, LogLine, LogSource, NewLogFile, Provider, ProviderId,
    SourceId,
};

/// Sources and providers to seed a [`MemoryRegistry`] with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryFixture {
    /// Parsing providers.
    #[serde(default)]
    pub providers: Vec<Provider>,
    /// Log sources; their `provider` is resolved from `providers`.
    #[serde(default)]
    pub sources: Vec<LogSource>,
    /// Previously registered files.
    #[serde(default)]
    pub files: Vec<LogFile>,
}

#[derive(Debug, Default)]
struct State {
    providers: HashMap<ProviderId, Provider>,
    sources: Vec<LogSource>,
    files: Vec<LogFile>,
    lines: Vec<LogLine>,
    next_file_id: i64,
    next_line_id: i64,
    failing_line_creates: usize,
    failing_sources: Vec<SourceId>,
    hide_created_files: bool,
    create_file_calls: usize,
    update_file_calls: usize,
}

/// Thread-safe in-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: RwLock<State>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry seeded from a fixture.
    #[must_use]
    pub fn from_fixture(fixture: RegistryFixture) -> Self {
        let registry = Self::new();
        for provider in fixture.providers {
            registry.add_provider(provider);
        }
        for source in fixture.sources {
            registry.add_source(source);
        }
        for file in fixture.files {
            registry.add_file(file);
        }
        registry
    }

    /// Loads a JSON fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_fixture(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let fixture: RegistryFixture = serde_json::from_str(&content)?;
        Ok(Self::from_fixture(fixture))
    }

    /// Adds or replaces a provider.
    pub fn add_provider(&self, provider: Provider) {
        self.state.write().providers.insert(provider.id, provider);
    }

    /// Adds a log source.
    pub fn add_source(&self, source: LogSource) {
        self.state.write().sources.push(source);
    }

    /// Adds an existing file record, keeping its id.
    pub fn add_file(&self, file: LogFile) {
        let mut state = self.state.write();
        state.next_file_id = state.next_file_id.max(file.id.0);
        state.files.push(file);
    }

    /// Adds an existing line record, keeping its id.
    pub fn add_line(&self, line: LogLine) {
        let mut state = self.state.write();
        state.next_line_id = state.next_line_id.max(line.id.0);
        state.lines.push(line);
    }

    /// Makes the next `count` line creations fail.
    pub fn fail_line_creates(&self, count: usize) {
        self.state.write().failing_line_creates = count;
    }

    /// Makes file listing fail for a source.
    pub fn fail_file_listing(&self, source_id: SourceId) {
        self.state.write().failing_sources.push(source_id);
    }

    /// Stops created files from showing up in listings.
    pub fn hide_created_files(&self, hide: bool) {
        self.state.write().hide_created_files = hide;
    }

    /// All file records.
    #[must_use]
    pub fn files(&self) -> Vec<LogFile> {
        self.state.read().files.clone()
    }

    /// All stored lines, in insertion order.
    #[must_use]
    pub fn lines(&self) -> Vec<LogLine> {
        self.state.read().lines.clone()
    }

    /// Stored lines for one file, in insertion order.
    #[must_use]
    pub fn lines_for_file(&self, file_id: FileId) -> Vec<LogLine> {
        self.state
            .read()
            .lines
            .iter()
            .filter(|l| l.file_id == file_id)
            .cloned()
            .collect()
    }

    /// Number of `create_file` calls served.
    #[must_use]
    pub fn create_file_calls(&self) -> usize {
        self.state.read().create_file_calls
    }

    /// Number of `update_file` calls served.
    #[must_use]
    pub fn update_file_calls(&self) -> usize {
        self.state.read().update_file_calls
    }
}

impl Registry for MemoryRegistry {
    fn list_sources_for_host(&self, host_id: HostId) -> RegistryFuture<'_, Vec<LogSource>> {
        Box::pin(async move {
            let state = self.state.read();
            Ok(state
                .sources
                .iter()
                .filter(|s| s.host_id == host_id)
                .map(|s| LogSource {
                    provider: state.providers.get(&s.provider_id).cloned(),
                    ..s.clone()
                })
                .collect())
        })
    }

    fn list_files_for_source(&self, source_id: SourceId) -> RegistryFuture<'_, Vec<LogFile>> {
        Box::pin(async move {
            let state = self.state.read();
            if state.failing_sources.contains(&source_id) {
                return Err(IngestError::Registry {
                    status: 500,
                    message: format!("listing files for source {source_id} failed"),
                });
            }
            Ok(state
                .files
                .iter()
                .filter(|f| f.log_source_id == source_id)
                .cloned()
                .collect())
        })
    }

    fn create_file<'a>(&'a self, file: &'a NewLogFile) -> RegistryFuture<'a, LogFile> {
        Box::pin(async move {
            let mut state = self.state.write();
            state.create_file_calls += 1;
            state.next_file_id += 1;
            let created = LogFile {
                id: FileId(state.next_file_id),
                log_source_id: file.log_source_id,
                file_name: file.file_name.clone(),
                file_complete: false,
                deleted: false,
            };
            if !state.hide_created_files {
                state.files.push(created.clone());
            }
            Ok(created)
        })
    }

    fn update_file<'a>(&'a self, file: &'a LogFile) -> RegistryFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.write();
            state.update_file_calls += 1;
            let existing = state
                .files
                .iter_mut()
                .find(|f| f.id == file.id)
                .ok_or_else(|| IngestError::Registry {
                    status: 404,
                    message: format!("log file {} not found", file.id),
                })?;
            *existing = file.clone();
            Ok(())
        })
    }

    fn line_count_for_file(&self, file_id: FileId) -> RegistryFuture<'_, i64> {
        Box::pin(async move {
            let state = self.state.read();
            let count = state
                .lines
                .iter()
                .filter(|l| l.file_id == file_id && !l.deleted)
                .count();
            Ok(i64::try_from(count).unwrap_or(i64::MAX))
        })
    }

    fn create_line<'a>(&'a self, line: &'a LogLine) -> RegistryFuture<'a, LogLine> {
        Box::pin(async move {
            let mut state = self.state.write();
            if state.failing_line_creates > 0 {
                state.failing_line_creates -= 1;
                return Err(IngestError::Registry {
                    status: 503,
                    message: "line store unavailable".to_string(),
                });
            }
            state.next_line_id += 1;
            let stored = LogLine {
                id: LineId(state.next_line_id),
                ..line.clone()
            };
            state.lines.push(stored.clone());
            Ok(stored)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn provider() -> Provider {
        Provider {
            id: ProviderId(1),
            name: "plain".to_string(),
            description: String::new(),
            regex: "(?<Text>.*)".to_string(),
            deleted: false,
        }
    }

    fn source(id: i64, host: i64) -> LogSource {
        LogSource {
            id: SourceId(id),
            host_id: HostId(host),
            provider_id: ProviderId(1),
            name: format!("source-{id}"),
            path: "/tmp".to_string(),
            deleted: false,
            provider: None,
        }
    }

    fn line(file_id: FileId) -> LogLine {
        LogLine {
            id: LineId(0),
            file_id,
            log_source_id: SourceId(1),
            log_date: Utc::now(),
            level: String::new(),
            thread: String::new(),
            source: String::new(),
            text: "t".to_string(),
            full_text: "t".to_string(),
            group_id: Uuid::new_v4(),
            created_by: "test".to_string(),
            deleted: false,
        }
    }

    #[tokio::test]
    async fn sources_are_filtered_by_host_and_resolve_provider() {
        let registry = MemoryRegistry::new();
        registry.add_provider(provider());
        registry.add_source(source(1, 10));
        registry.add_source(source(2, 20));

        let sources = registry.list_sources_for_host(HostId(10)).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, SourceId(1));
        assert_eq!(sources[0].provider.as_ref().map(|p| p.id), Some(ProviderId(1)));
    }

    #[tokio::test]
    async fn created_files_get_sequential_ids() {
        let registry = MemoryRegistry::new();
        let new_file = NewLogFile {
            log_source_id: SourceId(1),
            file_name: "a.log".to_string(),
            created_by: "test".to_string(),
        };

        let first = registry.create_file(&new_file).await.unwrap();
        let second = registry.create_file(&new_file).await.unwrap();
        assert_eq!(first.id, FileId(1));
        assert_eq!(second.id, FileId(2));
        assert_eq!(registry.create_file_calls(), 2);

        let listed = registry.list_files_for_source(SourceId(1)).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn hidden_files_are_not_listed() {
        let registry = MemoryRegistry::new();
        registry.hide_created_files(true);
        let new_file = NewLogFile {
            log_source_id: SourceId(1),
            file_name: "a.log".to_string(),
            created_by: "test".to_string(),
        };
        registry.create_file(&new_file).await.unwrap();

        assert!(registry.list_files_for_source(SourceId(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn line_count_tracks_created_lines() {
        let registry = MemoryRegistry::new();
        registry.create_line(&line(FileId(1))).await.unwrap();
        registry.create_line(&line(FileId(1))).await.unwrap();
        registry.create_line(&line(FileId(2))).await.unwrap();

        assert_eq!(registry.line_count_for_file(FileId(1)).await.unwrap(), 2);
        assert_eq!(registry.line_count_for_file(FileId(3)).await.unwrap(), 0);
        assert_eq!(registry.lines_for_file(FileId(2)).len(), 1);
    }

    #[tokio::test]
    async fn failing_line_creates_recover() {
        let registry = MemoryRegistry::new();
        registry.fail_line_creates(1);

        assert!(registry.create_line(&line(FileId(1))).await.is_err());
        assert!(registry.create_line(&line(FileId(1))).await.is_ok());
        assert_eq!(registry.lines().len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_file_fails() {
        let registry = MemoryRegistry::new();
        let file = LogFile {
            id: FileId(99),
            log_source_id: SourceId(1),
            file_name: "x.log".to_string(),
            file_complete: true,
            deleted: false,
        };
        assert!(registry.update_file(&file).await.is_err());
    }

    #[test]
    fn fixture_round_trips_through_json() {
        let fixture = RegistryFixture {
            providers: vec![provider()],
            sources: vec![source(1, 1)],
            files: Vec::new(),
        };
        let json = serde_json::to_string(&fixture).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.json");
        std::fs::write(&path, json).unwrap();

        let registry = MemoryRegistry::load_fixture(&path).unwrap();
        assert_eq!(registry.state.read().sources.len(), 1);
        assert_eq!(registry.state.read().providers.len(), 1);
    }
}
