//! Error types for the ingestion pipeline.

use thiserror::Error;

/// Errors that can occur while ingesting log files.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The provider has an empty regex pattern.
    #[error("provider '{0}' has an empty pattern")]
    EmptyPattern(String),

    /// The provider's regex pattern failed to compile.
    #[error("invalid pattern for provider '{provider}': {message}")]
    InvalidPattern {
        /// Provider name.
        provider: String,
        /// Compiler message.
        message: String,
    },

    /// The log source has no usable provider.
    #[error("log source '{0}' has no provider")]
    MissingProvider(String),

    /// A log source directory could not be listed.
    #[error("cannot read directory '{path}': {source}")]
    UnreadableDirectory {
        /// Directory path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP transport failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a non-success status.
    #[error("registry returned {status}: {message}")]
    Registry {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// A file record could not be read back after creation.
    #[error("log file '{0}' not found in registry after creation")]
    FileNotRegistered(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The record queue was closed by the receiving side.
    #[error("record queue closed")]
    QueueClosed,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl IngestError {
    /// Returns true for errors that come from source or provider setup,
    /// which skip the source with a warning instead of an error.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyPattern(_)
                | Self::InvalidPattern { .. }
                | Self::MissingProvider(_)
                | Self::UnreadableDirectory { .. }
                | Self::Config(_)
        )
    }

    /// Returns true if the error came from a cancelled operation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
