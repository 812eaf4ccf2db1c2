//! Error types for LogfoldDB.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. Open-time database corruption is reported as
//! `CorruptDatabase` wrapping the specific [`CorruptionKind`]; a database instance that
//! returned it must be discarded.

/// The specific corruption detected while validating a chunk database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionKind {
    /// A chunk file's header, footer, declared sizes, or content hash do not agree
    /// with its contents, or two adjacent chunks are both ongoing.
    BadChunkInDatabase,
    /// A chunk needed to reach the writer checkpoint is missing from the directory.
    ChunkNotFound,
    /// A live chunk file exists for a start number beyond the writer frontier.
    ExtraneousFileFound,
    /// The chaser or epoch checkpoint is ahead of the writer checkpoint.
    ReaderCheckpointHigherThanWriter,
}

impl std::fmt::Display for CorruptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CorruptionKind::BadChunkInDatabase => "bad chunk in database",
            CorruptionKind::ChunkNotFound => "chunk not found",
            CorruptionKind::ExtraneousFileFound => "extraneous file found",
            CorruptionKind::ReaderCheckpointHigherThanWriter => {
                "reader checkpoint higher than writer"
            }
        };
        f.write_str(name)
    }
}

/// Unified error type for all LogfoldDB operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The on-disk database failed open-time validation. Fatal to the instance.
    #[error("corrupt database ({kind}): {detail}")]
    CorruptDatabase {
        /// Which validation failed.
        kind: CorruptionKind,
        /// Human-readable description of the failure.
        detail: String,
    },

    /// Optimistic concurrency check failed: the stream's current version does not
    /// match the caller's expectation and the write is not idempotent.
    #[error("wrong expected version: expected {expected}, actual {actual}")]
    WrongExpectedVersion {
        /// The version the caller expected the stream to be at.
        expected: String,
        /// The version the stream is actually at.
        actual: String,
    },

    /// The requested stream does not exist.
    #[error("stream not found: {stream_id}")]
    StreamNotFound {
        /// Name of the stream that was not found.
        stream_id: String,
    },

    /// The referenced transaction does not exist or has already completed.
    #[error("transaction not found: {txn_id}")]
    TransactionNotFound {
        /// Identifier returned by `transaction_start`.
        txn_id: u64,
    },

    /// An I/O error occurred during a file operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record on disk is corrupt (e.g., CRC mismatch, truncated data).
    #[error("corrupt record at position {position}: {detail}")]
    CorruptRecord {
        /// Global byte offset of the corrupt record.
        position: u64,
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// An append would overflow the current chunk's body capacity.
    ///
    /// Internal to the chunk layer; the database rolls to a fresh chunk and
    /// retries rather than surfacing this to callers.
    #[error("chunk {chunk_start} full: {requested} bytes requested, {available} available")]
    ChunkFull {
        /// Start number of the full chunk.
        chunk_start: u32,
        /// Size of the rejected append.
        requested: usize,
        /// Remaining body capacity.
        available: usize,
    },

    /// The event exceeds the maximum allowed size.
    #[error("event too large: {size} bytes exceeds {max} byte limit")]
    EventTooLarge {
        /// Actual size of the event in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A request argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted in a state that forbids it (emitter state
    /// machine violation, or a projection determinism violation detected during
    /// recovery).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Construct a `CorruptDatabase` error.
    ///
    /// # Arguments
    ///
    /// * `kind` - Which validation failed.
    /// * `detail` - Human-readable description.
    pub fn corrupt(kind: CorruptionKind, detail: impl Into<String>) -> Error {
        Error::CorruptDatabase {
            kind,
            detail: detail.into(),
        }
    }

    /// The corruption kind, if this is a `CorruptDatabase` error.
    pub fn corruption_kind(&self) -> Option<CorruptionKind> {
        match self {
            Error::CorruptDatabase { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
