use serde::{Deserialize, Serialize};

// Defaults match the tuning the system shipped with.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_QUEUE_CAPACITY: usize = 4_096;
pub const DEFAULT_BATCH_SIZE: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// What `push` does when the ingest queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicy {
    /// Wait for capacity. The log reader stalls, the OS buffers the pipe.
    Block,
    /// Drop the incoming line and count it.
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Capacity bound on retained records; oldest evicted first.
    pub max_records: usize,
    /// Repeat-suppression window length in seconds.
    pub flush_interval_secs: u64,
    /// How long the consumer blocks on an empty queue before an idle check.
    pub queue_timeout_ms: u64,
    /// Bounded capacity of the raw-line queue.
    pub queue_capacity: usize,
    pub queue_policy: QueuePolicy,
    /// Embed once this many flushed entries have accumulated.
    pub batch_size: usize,
    /// Log source subprocess: program followed by its arguments.
    pub source_command: Vec<String>,
    /// How long in-flight work gets to finish on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_records: DEFAULT_MAX_RECORDS,
            flush_interval_secs: DEFAULT_FLUSH_INTERVAL_SECS,
            queue_timeout_ms: DEFAULT_QUEUE_TIMEOUT_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_policy: QueuePolicy::Block,
            batch_size: DEFAULT_BATCH_SIZE,
            source_command: vec![
                "journalctl".to_string(),
                "-f".to_string(),
                "-o".to_string(),
                "short".to_string(),
            ],
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}
