//! Agent and pipeline configuration.
//!
//! The agent reads a JSON file such as:
//!
//! ```json
//! {
//!   "host_id": 1,
//!   "api_url": "https://logs.example.com/api/",
//!   "queue_capacity": 1000,
//!   "truncation": "skip",
//!   "retry": { "max_attempts": 3, "initial_backoff_ms": 200, "max_backoff_ms": 5000 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cursor::TruncationPolicy;
use crate::error::{IngestError, Result};
use crate::types::HostId;

/// Default bounded queue capacity between producer and consumer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default number of leading bytes hashed per file.
pub const DEFAULT_FINGERPRINT_BYTES: usize = 1024;

/// Default attribution when none is configured.
pub const DEFAULT_CREATED_BY: &str = "loglens-agent";

/// Retry policy for persisting lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts per line, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between retries.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay after the given failed attempt (1-based), doubling each time.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Settings for one pipeline instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of the record queue.
    pub queue_capacity: usize,
    /// Attribution stamped on created files and lines.
    pub created_by: String,
    /// Leading bytes hashed for rewrite detection.
    pub fingerprint_bytes: usize,
    /// Handling of files shorter than their remote count.
    pub truncation: TruncationPolicy,
    /// Persistence retry policy.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            created_by: DEFAULT_CREATED_BY.to_string(),
            fingerprint_bytes: DEFAULT_FINGERPRINT_BYTES,
            truncation: TruncationPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the attribution string.
    #[must_use]
    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    /// Sets the truncation policy.
    #[must_use]
    pub const fn with_truncation(mut self, truncation: TruncationPolicy) -> Self {
        self.truncation = truncation;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_fingerprint_bytes() -> usize {
    DEFAULT_FINGERPRINT_BYTES
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Configuration file for the host agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Host whose sources are ingested.
    pub host_id: HostId,
    /// Base URL of the registry API.
    pub api_url: String,
    /// Bearer token for the registry API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Attribution; defaults to `loglens-agent@<hostname>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    /// Directory for local state such as fingerprints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Seconds between passes; a single pass when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass_interval_secs: Option<u64>,
    /// Capacity of the record queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Leading bytes hashed for rewrite detection.
    #[serde(default = "default_fingerprint_bytes")]
    pub fingerprint_bytes: usize,
    /// Handling of files shorter than their remote count.
    #[serde(default)]
    pub truncation: TruncationPolicy,
    /// Persistence retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl AgentConfig {
    /// Creates a config with defaults for everything but the host and API.
    #[must_use]
    pub fn new(host_id: HostId, api_url: impl Into<String>) -> Self {
        Self {
            host_id,
            api_url: api_url.into(),
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            created_by: None,
            state_dir: None,
            pass_interval_secs: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            fingerprint_bytes: DEFAULT_FINGERPRINT_BYTES,
            truncation: TruncationPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_json(&content)
    }

    /// Parses and validates a JSON config.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| IngestError::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(IngestError::Config("api_url cannot be empty".to_string()));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(IngestError::Config(
                "api_url must start with http:// or https://".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(IngestError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(IngestError::Config(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.fingerprint_bytes == 0 {
            return Err(IngestError::Config(
                "fingerprint_bytes must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(IngestError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.pass_interval_secs == Some(0) {
            return Err(IngestError::Config(
                "pass_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.created_by.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(IngestError::Config("created_by cannot be blank".to_string()));
        }
        Ok(())
    }

    /// Request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Builds the pipeline settings, using `fallback_created_by` when no
    /// attribution is configured.
    #[must_use]
    pub fn pipeline_config(&self, fallback_created_by: &str) -> PipelineConfig {
        PipelineConfig {
            queue_capacity: self.queue_capacity,
            created_by: self
                .created_by
                .clone()
                .unwrap_or_else(|| fallback_created_by.to_string()),
            fingerprint_bytes: self.fingerprint_bytes,
            truncation: self.truncation,
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parse_minimal_config() {
        let config =
            AgentConfig::from_json(r#"{"host_id": 3, "api_url": "http://localhost:5000/api"}"#)
                .unwrap();

        assert_eq!(config.host_id, HostId(3));
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.fingerprint_bytes, 1024);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.truncation, TruncationPolicy::Skip);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.pass_interval_secs.is_none());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "host_id": 1,
            "api_url": "https://logs.example.com/api/",
            "api_token": "token",
            "request_timeout_secs": 5,
            "created_by": "agent-7",
            "state_dir": "/var/lib/loglens",
            "pass_interval_secs": 60,
            "queue_capacity": 16,
            "fingerprint_bytes": 256,
            "truncation": "reingest",
            "retry": {"max_attempts": 5}
        }"#;
        let config = AgentConfig::from_json(json).unwrap();

        assert_eq!(config.api_token.as_deref(), Some("token"));
        assert_eq!(config.state_dir, Some(PathBuf::from("/var/lib/loglens")));
        assert_eq!(config.truncation, TruncationPolicy::Reingest);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 200);

        let pipeline = config.pipeline_config("fallback");
        assert_eq!(pipeline.created_by, "agent-7");
        assert_eq!(pipeline.queue_capacity, 16);
        assert_eq!(pipeline.fingerprint_bytes, 256);
    }

    #[test]
    fn pipeline_config_falls_back_to_default_attribution() {
        let config = AgentConfig::new(HostId(1), "http://localhost");
        assert_eq!(config.pipeline_config("agent@box").created_by, "agent@box");
    }

    #[test_case(r#"{"host_id": 1, "api_url": ""}"# ; "empty url")]
    #[test_case(r#"{"host_id": 1, "api_url": "ws://x"}"# ; "wrong scheme")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "queue_capacity": 0}"# ; "zero capacity")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "fingerprint_bytes": 0}"# ; "zero fingerprint")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "request_timeout_secs": 0}"# ; "zero timeout")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "retry": {"max_attempts": 0}}"# ; "zero attempts")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "pass_interval_secs": 0}"# ; "zero interval")]
    #[test_case(r#"{"host_id": 1, "api_url": "http://x", "created_by": " "}"# ; "blank attribution")]
    #[test_case(r#"{"api_url": "http://x"}"# ; "missing host")]
    #[test_case("not json" ; "garbage")]
    fn invalid_configs_are_rejected(json: &str) {
        let err = AgentConfig::from_json(json).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AgentConfig::new(HostId(9), "http://localhost:8080/api");
        config.pass_interval_secs = Some(30);
        config.save(&path).unwrap();

        let loaded = AgentConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = AgentConfig::load(Path::new("/nonexistent/loglens.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1_000));
    }

    #[test]
    fn no_retry_policy() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff(1), Duration::ZERO);
    }
}
