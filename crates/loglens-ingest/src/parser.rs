//! Provider-driven line parsing.
//!
//! A [`LineParser`] wraps one provider's compiled pattern. Lines that match
//! start a new group; lines that do not (stack traces, wrapped messages) are
//! kept verbatim and attached to the group of the last match, tracked by a
//! [`GroupTracker`] that lives for one file scan.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::{Captures, Regex};
use uuid::Uuid;

use crate::error::{IngestError, Result};
use crate::types::{ParsedLine, Provider};

const DATE_GROUP: &str = "Date";
const LEVEL_GROUP: &str = "Level";
const THREAD_GROUP: &str = "Thread";
const SOURCE_GROUP: &str = "Source";
const TEXT_GROUP: &str = "Text";

/// Naive timestamp layouts tried after RFC 3339, in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S%.f",
];

/// Tracks the grouping id of the most recent successful match.
#[derive(Debug, Default, Clone)]
pub struct GroupTracker {
    current: Option<Uuid>,
}

impl GroupTracker {
    /// Creates a tracker with no match seen yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Returns the id of the last match, if any.
    #[must_use]
    pub const fn current(&self) -> Option<Uuid> {
        self.current
    }

    fn start_group(&mut self) -> Uuid {
        let id = Uuid::new_v4();
        self.current = Some(id);
        id
    }

    fn continue_group(&mut self) -> Uuid {
        match self.current {
            Some(id) => id,
            None => self.start_group(),
        }
    }
}

/// Parser for one provider's line format.
#[derive(Debug, Clone)]
pub struct LineParser {
    provider: String,
    regex: Regex,
}

impl LineParser {
    /// Compiles the provider's pattern.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::EmptyPattern`] if the pattern is blank and
    /// [`IngestError::InvalidPattern`] if it does not compile.
    pub fn for_provider(provider: &Provider) -> Result<Self> {
        Self::new(&provider.name, &provider.regex)
    }

    /// Compiles a pattern under the given provider name.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is blank or does not compile.
    pub fn new(provider: &str, pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(IngestError::EmptyPattern(provider.to_string()));
        }

        let regex = Regex::new(pattern).map_err(|e| IngestError::InvalidPattern {
            provider: provider.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            provider: provider.to_string(),
            regex,
        })
    }

    /// Returns the provider name this parser was built for.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Parses a raw line. Never fails: unmatched lines degrade to a raw record.
    #[must_use]
    pub fn parse(&self, groups: &mut GroupTracker, raw: &str) -> ParsedLine {
        match self.regex.captures(raw) {
            Some(caps) => ParsedLine {
                timestamp: capture(&caps, DATE_GROUP)
                    .map(parse_timestamp)
                    .unwrap_or_default(),
                level: trimmed(&caps, LEVEL_GROUP),
                thread: trimmed(&caps, THREAD_GROUP),
                source: trimmed(&caps, SOURCE_GROUP),
                message: capture(&caps, TEXT_GROUP)
                    .map_or_else(|| raw.to_string(), |t| t.trim().to_string()),
                raw_line: raw.to_string(),
                grouping_id: groups.start_group(),
                matched: true,
            },
            None => ParsedLine {
                timestamp: DateTime::<Utc>::default(),
                level: String::new(),
                thread: String::new(),
                source: String::new(),
                message: raw.to_string(),
                raw_line: raw.to_string(),
                grouping_id: groups.continue_group(),
                matched: false,
            },
        }
    }
}

/// Looks up a named group, accepting the lower-case spelling too.
fn capture<'h>(caps: &Captures<'h>, name: &str) -> Option<&'h str> {
    caps.name(name)
        .or_else(|| caps.name(&name.to_lowercase()))
        .map(|m| m.as_str())
}

fn trimmed(caps: &Captures<'_>, name: &str) -> String {
    capture(caps, name).map(str::trim).unwrap_or_default().to_string()
}

/// Parses a captured timestamp; unknown layouts yield the Unix epoch.
#[must_use]
pub fn parse_timestamp(value: &str) -> DateTime<Utc> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return ts.with_timezone(&Utc);
    }

    for format in DATE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return naive.and_utc();
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use proptest::prelude::*;
    use test_case::test_case;

    const PATTERN: &str = r"^(?<Date>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) \[(?<Level>[^\]]*)\] \[(?<Thread>[^\]]*)\] \[(?<Source>[^\]]*)\] (?<Text>.*)$";

    fn parser() -> LineParser {
        LineParser::new("test", PATTERN).unwrap()
    }

    #[test]
    fn parser_extracts_named_captures() {
        let parser = parser();
        let mut groups = GroupTracker::new();

        let parsed = parser.parse(
            &mut groups,
            "2024-01-01 10:00:00 [INFO ] [ 1] [Test] hello world ",
        );

        assert!(parsed.matched);
        assert_eq!(parsed.level, "INFO");
        assert_eq!(parsed.thread, "1");
        assert_eq!(parsed.source, "Test");
        assert_eq!(parsed.message, "hello world");
        assert_eq!(parsed.timestamp.year(), 2024);
        assert_eq!(parsed.timestamp.hour(), 10);
        assert_eq!(
            parsed.raw_line,
            "2024-01-01 10:00:00 [INFO ] [ 1] [Test] hello world "
        );
    }

    #[test]
    fn continuation_lines_share_group() {
        let parser = parser();
        let mut groups = GroupTracker::new();

        let first = parser.parse(&mut groups, "2024-01-01 10:00:00 [INFO] [1] [Test] hello");
        let second = parser.parse(&mut groups, "  stack trace line");
        let third = parser.parse(&mut groups, "2024-01-01 10:00:01 [INFO] [1] [Test] world");

        assert_eq!(first.grouping_id, second.grouping_id);
        assert_ne!(first.grouping_id, third.grouping_id);
        assert_eq!(groups.current(), Some(third.grouping_id));
    }

    #[test]
    fn unmatched_line_falls_back_to_raw_text() {
        let parser = parser();
        let mut groups = GroupTracker::new();

        let parsed = parser.parse(&mut groups, "  at Foo.Bar() in Program.cs:line 12");

        assert!(!parsed.matched);
        assert_eq!(parsed.message, "  at Foo.Bar() in Program.cs:line 12");
        assert_eq!(parsed.raw_line, parsed.message);
        assert!(parsed.level.is_empty());
        assert!(parsed.thread.is_empty());
        assert!(parsed.source.is_empty());
        assert_eq!(parsed.timestamp, DateTime::<Utc>::default());
    }

    #[test]
    fn first_unmatched_line_gets_fresh_group() {
        let parser = parser();
        let mut groups = GroupTracker::new();
        assert!(groups.current().is_none());

        let parsed = parser.parse(&mut groups, "orphan continuation");
        assert_eq!(groups.current(), Some(parsed.grouping_id));

        let next = parser.parse(&mut groups, "another orphan");
        assert_eq!(parsed.grouping_id, next.grouping_id);
    }

    #[test]
    fn missing_text_capture_uses_raw_line() {
        let parser = LineParser::new("levels", r"^(?<Level>[A-Z]+):").unwrap();
        let mut groups = GroupTracker::new();

        let parsed = parser.parse(&mut groups, "WARN: disk almost full");
        assert!(parsed.matched);
        assert_eq!(parsed.level, "WARN");
        assert_eq!(parsed.message, "WARN: disk almost full");
        assert!(parsed.thread.is_empty());
    }

    #[test]
    fn lower_case_group_names_are_accepted() {
        let parser = LineParser::new("lower", r"^(?<level>\w+) (?<text>.*)$").unwrap();
        let mut groups = GroupTracker::new();

        let parsed = parser.parse(&mut groups, "ERROR boom");
        assert_eq!(parsed.level, "ERROR");
        assert_eq!(parsed.message, "boom");
    }

    #[test]
    fn unparseable_date_yields_epoch() {
        let parser = LineParser::new("dates", r"^(?<Date>\S+) (?<Text>.*)$").unwrap();
        let mut groups = GroupTracker::new();

        let parsed = parser.parse(&mut groups, "yesterday something happened");
        assert!(parsed.matched);
        assert_eq!(parsed.timestamp, DateTime::<Utc>::default());
        assert_eq!(parsed.message, "something happened");
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let err = LineParser::new("blank", "   ").unwrap_err();
        assert!(matches!(err, IngestError::EmptyPattern(name) if name == "blank"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = LineParser::new("broken", "(?<Date>").unwrap_err();
        assert!(matches!(err, IngestError::InvalidPattern { .. }));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn for_provider_uses_provider_name() {
        let provider = Provider {
            id: crate::types::ProviderId(1),
            name: "serilog".to_string(),
            description: String::new(),
            regex: PATTERN.to_string(),
            deleted: false,
        };
        let parser = LineParser::for_provider(&provider).unwrap();
        assert_eq!(parser.provider(), "serilog");
    }

    #[test_case("2024-01-01 10:00:00", 2024, 1, 10, 0 ; "space separated")]
    #[test_case("2024-01-01 10:00:00.250", 2024, 1, 10, 250 ; "fractional seconds")]
    #[test_case("2024-03-05 08:15:30,125", 2024, 3, 8, 125 ; "comma milliseconds")]
    #[test_case("2024-03-05T08:15:30", 2024, 3, 8, 0 ; "iso without zone")]
    #[test_case("2024-03-05T08:15:30Z", 2024, 3, 8, 0 ; "rfc3339 utc")]
    #[test_case("2024-03-05T10:15:30+02:00", 2024, 3, 8, 0 ; "rfc3339 offset")]
    #[test_case("2023/12/31 23:59:59", 2023, 12, 23, 0 ; "slashes")]
    #[test_case("2022-07-04", 2022, 7, 0, 0 ; "date only")]
    fn timestamp_formats(input: &str, year: i32, month: u32, hour: u32, millis: u32) {
        let ts = parse_timestamp(input);
        assert_eq!(ts.year(), year);
        assert_eq!(ts.month(), month);
        assert_eq!(ts.hour(), hour);
        assert_eq!(ts.timestamp_subsec_millis(), millis);
    }

    proptest! {
        #[test]
        fn parse_never_loses_the_raw_line(line in ".*") {
            let parser = parser();
            let mut groups = GroupTracker::new();
            let parsed = parser.parse(&mut groups, &line);
            prop_assert_eq!(&parsed.raw_line, &line);
            if !parsed.matched {
                prop_assert_eq!(&parsed.message, &line);
            }
        }

        #[test]
        fn unparseable_timestamps_never_panic(value in "\\PC*") {
            let _ = parse_timestamp(&value);
        }
    }
}
