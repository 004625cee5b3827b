//! # loglens-ingest
//!
//! Incremental ingestion of on-disk log files into the Loglens registry.
//!
//! This crate provides:
//!
//! - [`LineParser`] — provider regex parsing with continuation-line grouping
//! - [`FileCursor`] — decides which lines of a file are new
//! - [`FingerprintStore`] — detects files rewritten in place
//! - [`Producer`] — walks a host's sources and queues new lines
//! - [`Consumer`] — persists queued lines with bounded retry
//! - [`Pipeline`] — runs both over a bounded queue for one pass
//! - [`Registry`] — the registry seam, with [`HttpRegistry`] and [`MemoryRegistry`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loglens_ingest::{HostId, HttpRegistry, HttpRegistryConfig, Pipeline, PipelineConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> loglens_ingest::Result<()> {
//! let registry = HttpRegistry::new(HttpRegistryConfig::new("https://logs.example.com/api/"))?;
//! let pipeline = Pipeline::new(Arc::new(registry), PipelineConfig::default());
//!
//! let report = pipeline.run_pass(HostId(1), &CancellationToken::new()).await;
//! println!("stored {} lines", report.consumer.persisted);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod consumer;
pub mod cursor;
pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod pipeline;
pub mod producer;
pub mod registry;
pub mod types;

// Re-export main types
pub use config::{AgentConfig, PipelineConfig, RetryPolicy};
pub use consumer::{Consumer, ConsumerStats, DEAD_LETTER_TARGET};
pub use cursor::{CursorPlan, FileCursor, PartialTail, TruncationPolicy};
pub use error::{IngestError, Result};
pub use fingerprint::{FileState, Fingerprint, FingerprintStore};
pub use parser::{GroupTracker, LineParser, parse_timestamp};
pub use pipeline::{PassReport, Pipeline};
pub use producer::{DiskFile, PassStats, Producer, list_directory};
pub use registry::{
    HttpRegistry, HttpRegistryConfig, MemoryRegistry, Registry, RegistryFixture, RegistryFuture,
    cancellable,
};
pub use types::{
    FileId, Host, HostId, LineId, LogFile, LogLine, LogSource, NewLogFile, ParsedLine, Provider,
    ProviderId, SourceId,
};
