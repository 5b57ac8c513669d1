//! Configuration for the sync engine.

use std::time::Duration;

/// Observed network quality, used to adapt batch concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkQuality {
    /// Fast, reliable link.
    Good,
    /// Usable but constrained link.
    Fair,
    /// Slow or lossy link; serialize batches.
    Poor,
}

impl NetworkQuality {
    /// Maximum simultaneously in-flight batches for this quality.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        match self {
            NetworkQuality::Good => 8,
            NetworkQuality::Fair => 4,
            NetworkQuality::Poor => 1,
        }
    }
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum operations per batch.
    pub max_batch_items: usize,
    /// Maximum cumulative estimated payload bytes per batch.
    pub max_batch_bytes: usize,
    /// Maximum simultaneously in-flight batches. Overridden by
    /// `network_quality` when set.
    pub max_concurrent_batches: usize,
    /// Network quality hint; when set, wins over `max_concurrent_batches`.
    pub network_quality: Option<NetworkQuality>,
    /// Backoff delay schedule; attempt `n` sleeps `retry_delays[n]`,
    /// clamped to the last entry.
    pub retry_delays: Vec<Duration>,
    /// Maximum retry attempts per batch.
    pub max_batch_retries: u32,
    /// Timeout for each network-facing attempt.
    pub operation_timeout: Duration,
    /// Maximum resolution attempts per conflict.
    pub max_conflict_retries: u32,
    /// Whether conflict transitions are written to durable storage.
    pub persistence_enabled: bool,
    /// How long terminal conflicts are retained before cleanup.
    pub conflict_retention: Duration,
    /// Capacity of the bounded sync event queue.
    pub event_queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch_items: 50,
            max_batch_bytes: 512 * 1024,
            max_concurrent_batches: 4,
            network_quality: None,
            retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            max_batch_retries: 3,
            operation_timeout: Duration::from_secs(30),
            max_conflict_retries: 3,
            persistence_enabled: true,
            conflict_retention: Duration::from_secs(7 * 24 * 3600),
            event_queue_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Effective batch concurrency, honoring the network-quality hint.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        self.network_quality
            .map(|q| q.concurrency())
            .unwrap_or(self.max_concurrent_batches)
            .max(1)
    }

    /// Backoff delay for a retry attempt (0-based), capped at the last
    /// configured delay. An empty schedule means no sleep.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        match self.retry_delays.last() {
            Some(last) => *self
                .retry_delays
                .get(attempt as usize)
                .unwrap_or(last),
            None => Duration::ZERO,
        }
    }
}
