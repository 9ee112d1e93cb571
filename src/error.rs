//! Error types for bookfeed-dl
//!
//! The taxonomy follows how an operator has to react:
//! - [`Error::Auth`] - credentials or configuration problem, never retried
//! - [`Error::TransientFetch`] - network blip or server-side failure, retried within a bound
//! - [`Error::FatalFetch`] - protocol violation or expired session, surfaced immediately
//! - [`Error::Store`] (see [`StoreError::Write`]) - disk or permission failure, fatal
//!
//! Every failure that ends a retrieval run is wrapped in [`Error::Aborted`], which
//! carries the batch sequence number that failed and the number of batches that
//! were saved, so a re-run can be judged safe.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bookfeed-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bookfeed-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retrieval.batch_size")
        key: Option<String>,
    },

    /// Credentials were rejected or the service could not be reached to authenticate
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Retryable fetch failure (network, timeout, 5xx, 429)
    #[error("transient fetch error at offset {offset}: {reason}")]
    TransientFetch {
        /// Record offset that was being requested
        offset: u64,
        /// What went wrong
        reason: String,
    },

    /// Non-retryable fetch failure (malformed response, rejected request, expired session)
    #[error("fatal fetch error at offset {offset}: {reason}")]
    FatalFetch {
        /// Record offset that was being requested
        offset: u64,
        /// What went wrong
        reason: String,
    },

    /// Transaction acknowledgement failed
    #[error("confirmation of transaction {transaction_id} failed: {reason}")]
    Confirm {
        /// Server transaction that could not be confirmed
        transaction_id: String,
        /// What went wrong
        reason: String,
    },

    /// Batch store error
    #[error("batch store error: {0}")]
    Store(#[from] StoreError),

    /// Batch document could not be parsed
    #[error("malformed batch document: {0}")]
    Document(String),

    /// The service kept returning the already stored batch
    #[error("no progress: {duplicates} consecutive duplicate batches (first index {first_index})")]
    NoProgress {
        /// Number of duplicates received in a row
        duplicates: u32,
        /// First index the service keeps returning
        first_index: u64,
    },

    /// A retrieval run terminated because of `source`
    #[error(
        "batch {sequence} failed at offset {offset} after {attempts} attempt(s), {batches_saved} batch(es) saved: {source}"
    )]
    Aborted {
        /// Sequence number of the batch that was being retrieved
        sequence: u64,
        /// Record offset that was being requested
        offset: u64,
        /// Fetch attempts made for this batch
        attempts: u32,
        /// Batches present in the store when the run ended
        batches_saved: usize,
        /// The underlying failure
        source: Box<Error>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Batch store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing or committing a batch file failed
    #[error("failed to write batch {sequence} to {path}: {source}")]
    Write {
        /// Sequence number of the batch being written
        sequence: u64,
        /// File that was being written or renamed
        path: PathBuf,
        /// The I/O failure
        source: std::io::Error,
    },

    /// Listing or reading the store directory failed
    #[error("failed to read batch store at {path}: {source}")]
    Read {
        /// Directory or file that could not be read
        path: PathBuf,
        /// The I/O failure
        source: std::io::Error,
    },

    /// Stored sequence numbers are not contiguous
    #[error("sequence gap in batch store: expected batch {expected}, found {found}")]
    SequenceGap {
        /// Sequence number that should come next
        expected: u64,
        /// Sequence number actually found
        found: u64,
    },

    /// Two stored batches start with the same record
    #[error("batches {first} and {second} share first index {first_index}")]
    DuplicateFirstIndex {
        /// Earlier sequence number
        first: u64,
        /// Later sequence number
        second: u64,
        /// The shared first index
        first_index: u64,
    },

    /// The most recent batch carries no usable first index
    #[error("batch {sequence} at {path} has no readable first index: {reason}")]
    UnreadableBatch {
        /// Sequence number of the batch
        sequence: u64,
        /// Batch file
        path: PathBuf,
        /// Why the index could not be read
        reason: String,
    },

    /// Attempted to persist a batch without records
    #[error("refusing to persist an empty batch")]
    EmptyBatch,

    /// Referenced a sequence number that is not stored
    #[error("batch {0} is not in the store")]
    UnknownBatch(u64),
}

impl Error {
    /// Shorthand for a configuration error on a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Machine-readable error code, stable across releases
    ///
    /// Used in structured log output so failures can be grepped and alerted on.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Auth(_) => "auth_error",
            Error::TransientFetch { .. } => "transient_fetch_error",
            Error::FatalFetch { .. } => "fatal_fetch_error",
            Error::Confirm { .. } => "confirm_error",
            Error::Store(StoreError::Write { .. }) => "store_write_error",
            Error::Store(_) => "store_error",
            Error::Document(_) => "document_error",
            Error::NoProgress { .. } => "no_progress",
            Error::Aborted { source, .. } => source.error_code(),
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
        }
    }

    /// The innermost error, unwrapping [`Error::Aborted`]
    pub fn root(&self) -> &Error {
        match self {
            Error::Aborted { source, .. } => source.root(),
            other => other,
        }
    }
}
