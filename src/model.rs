use serde::{Deserialize, Serialize};

/// One embedded log message and its summary metadata.
///
/// Owned by the store once appended; never mutated afterwards. A record and
/// its embedding are created together and only ever evicted together.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    /// Monotonically increasing sequence number.
    pub id: u64,

    /// The normalized message text that was embedded.
    pub text: String,

    /// Unix seconds at the flush that produced this record.
    pub timestamp: f64,

    /// How many identical lines this record summarizes (>= 1).
    pub repeat_count: u32,
}

impl Record {
    pub fn new(id: u64, text: String, timestamp: f64, repeat_count: u32) -> Self {
        Self {
            id,
            text,
            timestamp,
            repeat_count,
        }
    }
}

/// A deduplicated message leaving the repeat cache, on its way to the
/// batcher. The timestamp is shared by every entry of one flush call.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedEntry {
    pub text: String,
    pub repeat_count: u32,
    pub timestamp: f64,
}
