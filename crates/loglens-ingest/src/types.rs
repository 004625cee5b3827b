//! Registry entities handled by the ingestion pipeline.
//!
//! This module provides:
//! - [`Host`], [`Provider`], [`LogSource`] — operator-managed configuration
//! - [`LogFile`] — a tracked physical file under a source
//! - [`LogLine`] — one parsed (or raw-fallback) log record
//! - Identifier newtypes for each entity

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Identifier of a monitored host.
    HostId
);
entity_id!(
    /// Identifier of a parsing provider.
    ProviderId
);
entity_id!(
    /// Identifier of a log source directory.
    SourceId
);
entity_id!(
    /// Identifier of a tracked log file.
    FileId
);
entity_id!(
    /// Identifier of a persisted log line.
    LineId
);

/// A machine being monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Host identifier.
    pub id: HostId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

/// A named regular expression for one log line format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Provider identifier.
    pub id: ProviderId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Pattern with `Date`, `Level`, `Thread`, `Source` and `Text` captures.
    #[serde(default)]
    pub regex: String,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

/// A directory on a host whose files are tailed with one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSource {
    /// Source identifier.
    pub id: SourceId,
    /// Owning host.
    pub host_id: HostId,
    /// Provider used to parse lines.
    pub provider_id: ProviderId,
    /// Display name.
    pub name: String,
    /// Directory to scan.
    pub path: String,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
    /// Provider resolved by the registry, if any.
    #[serde(default)]
    pub provider: Option<Provider>,
}

impl LogSource {
    /// Returns the provider if it is present and not deleted.
    #[must_use]
    pub fn active_provider(&self) -> Option<&Provider> {
        self.provider.as_ref().filter(|p| !p.deleted)
    }
}

/// A physical file discovered under a log source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFile {
    /// File identifier.
    pub id: FileId,
    /// Owning log source.
    pub log_source_id: SourceId,
    /// File name relative to the source path.
    pub file_name: String,
    /// Set once a pass has processed the file's whole content.
    #[serde(default)]
    pub file_complete: bool,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

/// Payload for registering a newly discovered file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLogFile {
    /// Owning log source.
    pub log_source_id: SourceId,
    /// File name relative to the source path.
    pub file_name: String,
    /// Attribution of the creating agent.
    pub created_by: String,
}

/// One parsed log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Line identifier, zero until persisted.
    #[serde(default)]
    pub id: LineId,
    /// File the line was read from.
    pub file_id: FileId,
    /// Source the file belongs to.
    pub log_source_id: SourceId,
    /// Timestamp parsed from the line, or the Unix epoch.
    pub log_date: DateTime<Utc>,
    /// Level capture.
    pub level: String,
    /// Thread capture.
    pub thread: String,
    /// Logical source capture.
    pub source: String,
    /// Message text.
    pub text: String,
    /// The raw line as read from disk.
    pub full_text: String,
    /// Groups a matched entry with its continuation lines.
    pub group_id: Uuid,
    /// Attribution of the producing agent.
    pub created_by: String,
    /// Soft-delete flag.
    #[serde(default)]
    pub deleted: bool,
}

/// The parser's output before it is tagged with file and source ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    /// Timestamp, or the Unix epoch when absent or unparseable.
    pub timestamp: DateTime<Utc>,
    /// Trimmed level, possibly empty.
    pub level: String,
    /// Trimmed thread, possibly empty.
    pub thread: String,
    /// Trimmed logical source, possibly empty.
    pub source: String,
    /// Message text.
    pub message: String,
    /// The raw line.
    pub raw_line: String,
    /// Grouping identifier.
    pub grouping_id: Uuid,
    /// Whether the provider pattern matched.
    pub matched: bool,
}

impl ParsedLine {
    /// Tags the parsed line with its origin, producing a record for the queue.
    #[must_use]
    pub fn into_log_line(self, file_id: FileId, source_id: SourceId, created_by: &str) -> LogLine {
        LogLine {
            id: LineId::default(),
            file_id,
            log_source_id: source_id,
            log_date: self.timestamp,
            level: self.level,
            thread: self.thread,
            source: self.source,
            text: self.message,
            full_text: self.raw_line,
            group_id: self.grouping_id,
            created_by: created_by.to_string(),
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(deleted: bool) -> Provider {
        Provider {
            id: ProviderId(1),
            name: "log4net".to_string(),
            description: String::new(),
            regex: "(?P<Text>.*)".to_string(),
            deleted,
        }
    }

    fn source(provider: Option<Provider>) -> LogSource {
        LogSource {
            id: SourceId(7),
            host_id: HostId(1),
            provider_id: ProviderId(1),
            name: "web".to_string(),
            path: "/var/log/web".to_string(),
            deleted: false,
            provider,
        }
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&FileId(42)).unwrap();
        assert_eq!(json, "42");
        let id: SourceId = serde_json::from_str("9").unwrap();
        assert_eq!(id, SourceId(9));
        assert_eq!(HostId(3).to_string(), "3");
    }

    #[test]
    fn active_provider_filters_deleted() {
        assert!(source(Some(provider(false))).active_provider().is_some());
        assert!(source(Some(provider(true))).active_provider().is_none());
        assert!(source(None).active_provider().is_none());
    }

    #[test]
    fn log_source_uses_camel_case() {
        let json = r#"{
            "id": 5,
            "hostId": 1,
            "providerId": 2,
            "name": "api",
            "path": "/srv/api/logs",
            "provider": {"id": 2, "name": "nlog", "regex": "(?P<Text>.*)"}
        }"#;
        let source: LogSource = serde_json::from_str(json).unwrap();
        assert_eq!(source.host_id, HostId(1));
        assert!(!source.deleted);
        assert_eq!(source.provider.map(|p| p.name), Some("nlog".to_string()));
    }

    #[test]
    fn parsed_line_into_log_line() {
        let group = Uuid::new_v4();
        let parsed = ParsedLine {
            timestamp: DateTime::<Utc>::default(),
            level: "INFO".to_string(),
            thread: "1".to_string(),
            source: "Test".to_string(),
            message: "hello".to_string(),
            raw_line: "raw hello".to_string(),
            grouping_id: group,
            matched: true,
        };

        let line = parsed.into_log_line(FileId(3), SourceId(4), "agent@host");
        assert_eq!(line.id, LineId(0));
        assert_eq!(line.file_id, FileId(3));
        assert_eq!(line.log_source_id, SourceId(4));
        assert_eq!(line.text, "hello");
        assert_eq!(line.full_text, "raw hello");
        assert_eq!(line.group_id, group);
        assert_eq!(line.created_by, "agent@host");
    }

    #[test]
    fn log_line_json_field_names() {
        let line = ParsedLine {
            timestamp: DateTime::<Utc>::default(),
            level: String::new(),
            thread: String::new(),
            source: String::new(),
            message: "m".to_string(),
            raw_line: "m".to_string(),
            grouping_id: Uuid::nil(),
            matched: false,
        }
        .into_log_line(FileId(1), SourceId(2), "x");

        let value = serde_json::to_value(&line).unwrap();
        assert!(value.get("fileId").is_some());
        assert!(value.get("logSourceId").is_some());
        assert!(value.get("fullText").is_some());
        assert!(value.get("groupId").is_some());
    }
}
