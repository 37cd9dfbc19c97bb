use thiserror::Error;

/// Everything that can go wrong between a raw log line and a search result.
#[derive(Debug, Error)]
pub enum Error {
    /// User typed an empty or whitespace-only search. Recovered at the REPL.
    #[error("query text is empty")]
    InvalidQuery,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding backend rejected a whole batch. The batch is dropped,
    /// the pipeline keeps running.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    /// The log subprocess could not be spawned or died underneath us.
    #[error("log source process failed: {0}")]
    SourceProcessFailure(String),

    /// The metadata sequence and the vector index disagree on length.
    /// Not recoverable: every later search would map positions to the
    /// wrong records.
    #[error("store out of sync: {records} records vs {vectors} vectors")]
    IndexInconsistency { records: usize, vectors: usize },

    /// Vector of the wrong width reached the index.
    #[error("vector dimension mismatch: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    /// All producers hung up. Signals clean shutdown to consumer loops.
    #[error("ingest queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
