//! Runs one producer and one consumer over a bounded queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::consumer::{Consumer, ConsumerStats};
use crate::fingerprint::FingerprintStore;
use crate::producer::{PassStats, Producer};
use crate::registry::Registry;
use crate::types::HostId;

/// Outcome of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Host the pass ran for.
    pub host_id: HostId,
    /// Producer counters.
    pub producer: PassStats,
    /// Consumer counters.
    pub consumer: ConsumerStats,
    /// Whether either side stopped early.
    pub cancelled: bool,
    /// Wall-clock duration of the pass.
    #[serde(skip)]
    pub elapsed: Duration,
}

impl PassReport {
    /// Records that reached the queue but were not stored.
    #[must_use]
    pub const fn undelivered(&self) -> usize {
        self.producer
            .lines_emitted
            .saturating_sub(self.consumer.persisted)
    }
}

/// Wires the producer and consumer for a host.
pub struct Pipeline {
    registry: Arc<dyn Registry>,
    fingerprints: Arc<FingerprintStore>,
    config: PipelineConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("tracked_files", &self.fingerprints.len())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a pipeline with an in-memory fingerprint store.
    #[must_use]
    pub fn new(registry: Arc<dyn Registry>, config: PipelineConfig) -> Self {
        Self::with_fingerprints(registry, Arc::new(FingerprintStore::in_memory()), config)
    }

    /// Creates a pipeline with the given fingerprint store.
    #[must_use]
    pub fn with_fingerprints(
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

    /// The pipeline's settings.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs a single pass for `host_id`.
    ///
    /// The consumer task is always joined before this returns, so every
    /// record handed to the queue has been stored, dead-lettered, or dropped
    /// on cancellation.
    pub async fn run_pass(&self, host_id: HostId, token: &CancellationToken) -> PassReport {
        let started = Instant::now();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));

        let consumer = Consumer::new(self.registry.clone(), self.config.retry);
        let consumer_token = token.clone();
        let consumer_handle = tokio::spawn(async move { consumer.run(rx, &consumer_token).await });

        let producer = Producer::new(
            self.registry.clone(),
            self.fingerprints.clone(),
            self.config.clone(),
        );
        let producer_stats = producer.run(host_id, tx, token).await;

        let consumer_stats = match consumer_handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(host = %host_id, error = %e, "consumer task failed");
                ConsumerStats::default()
            }
        };

        let report = PassReport {
            host_id,
            cancelled: producer_stats.cancelled || consumer_stats.cancelled,
            producer: producer_stats,
            consumer: consumer_stats,
            elapsed: started.elapsed(),
        };

        info!(
            host = %host_id,
            lines = report.producer.lines_emitted,
            persisted = report.consumer.persisted,
            dead_lettered = report.consumer.dead_lettered,
            cancelled = report.cancelled,
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            "pass complete"
        );
        report
    }
}
