use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options consumed by an opened stream.
///
/// Every field has a default, so a partial JSON or TOML table is enough to build one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Number of segments from the end of a live playlist to start with.
    pub live_edge: usize,
    /// Skip this many seconds from the start of the first playlist.
    pub start_offset: Option<f64>,
    /// Stop after this many seconds of media were scheduled.
    pub duration: Option<f64>,

    /// Retry policy for segments and keys.
    pub retry: RetryPolicy,
    /// Attempts for each playlist load.
    pub playlist_reload_attempts: u32,
    pub request_timeout_ms: Option<u64>,

    /// Concurrent fetch and decrypt workers.
    pub workers: usize,
    /// Maximum number of chunks in flight or waiting for the reader.
    pub queue_capacity: usize,
    /// Consecutive refreshes without a new segment before a live stream is considered dead.
    pub max_stalled_refreshes: u32,

    /// Hex encoded AES-128 key used instead of every key in the playlist.
    pub key_override: Option<String>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            live_edge: 3,
            start_offset: None,
            duration: None,
            retry: RetryPolicy::default(),
            playlist_reload_attempts: 3,
            request_timeout_ms: None,
            workers: 1,
            queue_capacity: 20,
            max_stalled_refreshes: 10,
            key_override: None,
        }
    }
}

impl StreamOptions {
    pub fn with_live_edge(mut self, live_edge: usize) -> Self {
        self.live_edge = live_edge;
        self
    }

    pub fn with_start_offset(mut self, seconds: f64) -> Self {
        self.start_offset = Some(seconds);
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_max_stalled_refreshes(mut self, refreshes: u32) -> Self {
        self.max_stalled_refreshes = refreshes;
        self
    }

    pub fn with_key_override(mut self, key: impl Into<String>) -> Self {
        self.key_override = Some(key.into());
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn playlist_retry(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.playlist_reload_attempts,
            ..self.retry.clone()
        }
    }

    /// The values the pipeline relies on being non-zero.
    pub(crate) fn live_edge(&self) -> usize {
        self.live_edge.max(1)
    }

    pub(crate) fn workers(&self) -> usize {
        self.workers.max(1)
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

/// Bounded attempts with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts,
            backoff_ms: backoff.as_millis() as u64,
            ..Default::default()
        }
    }

    /// Delay before the attempt following `failed` failed attempts.
    pub fn delay(&self, failed: u32) -> Duration {
        let factor = 1u64 << failed.saturating_sub(1).min(16);
        Duration::from_millis(
            self.backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms.max(self.backoff_ms)),
        )
    }
}
