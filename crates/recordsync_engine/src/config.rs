//! Configuration for the sync engine.

use rand::Rng;
use recordsync_storage::DEFAULT_COMPRESSION_LEVEL;
use std::path::PathBuf;
use std::time::Duration;

/// Default relative path of the ledger file inside the local store.
pub const DEFAULT_LEDGER_PATH: &str = "recordsync/known-records.cbor";

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Remote namespace opened by the ready gate.
    pub namespace: String,
    /// Absolute directory the local store is rooted at, if any.
    ///
    /// Used to turn absolute file paths into logical paths.
    pub data_dir: Option<PathBuf>,
    /// Ledger location, relative to the local store.
    pub ledger_path: PathBuf,
    /// Directory for temporary blob spill files.
    pub blob_dir: PathBuf,
    /// How long fetch requests are collected before a batch is sent.
    pub fetch_debounce: Duration,
    /// Maximum number of keys per fetch round trip.
    pub fetch_batch_size: usize,
    /// Interval of the ledger flush task.
    pub ledger_flush_interval: Duration,
    /// Number of blocking workers for encode/decode and local I/O.
    pub worker_threads: usize,
    /// Compress payloads sent to the remote store.
    pub compress_remote: bool,
    /// zstd level for local and remote compression.
    pub compression_level: i32,
    /// Back-off for the ready gate and undated transient errors.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a configuration for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            data_dir: None,
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            blob_dir: std::env::temp_dir().join("recordsync-blobs"),
            fetch_debounce: Duration::from_millis(50),
            fetch_batch_size: 100,
            ledger_flush_interval: Duration::from_secs(1),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            compress_remote: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the absolute data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the ledger path.
    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ledger_path = path.into();
        self
    }

    /// Sets the blob spill directory.
    pub fn with_blob_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.blob_dir = dir.into();
        self
    }

    /// Sets the fetch debounce window.
    pub fn with_fetch_debounce(mut self, window: Duration) -> Self {
        self.fetch_debounce = window;
        self
    }

    /// Sets the fetch batch size. Zero is treated as one.
    pub fn with_fetch_batch_size(mut self, size: usize) -> Self {
        self.fetch_batch_size = size.max(1);
        self
    }

    /// Sets the ledger flush interval.
    pub fn with_ledger_flush_interval(mut self, interval: Duration) -> Self {
        self.ledger_flush_interval = interval;
        self
    }

    /// Sets the worker pool size. Zero is treated as one.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads.max(1);
        self
    }

    /// Enables or disables remote payload compression.
    pub fn with_remote_compression(mut self, enabled: bool) -> Self {
        self.compress_remote = enabled;
        self
    }

    /// Sets the zstd level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("recordsync")
    }
}

/// Back-off for retries that carry no server-suggested delay.
///
/// Retries are unbounded; only the delay grows.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default back-off: 100 ms doubling up to 30 s, with jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Near-zero delays, no jitter.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Calculates the delay before retry number `attempt` (1-based; 0 means no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
