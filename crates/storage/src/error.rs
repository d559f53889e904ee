//! Error types for store and transfer operations.

use thiserror::Error;

use pipeline_artifact_model::ManifestError;

/// Errors from a single store operation.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Store unreachable or timed out. Retryable with backoff.
    #[error("Transient store failure for {key}: {message}")]
    Transient {
        /// Store key the operation targeted.
        key: String,
        /// Underlying failure description.
        message: String,
    },

    /// Object not present in the store.
    #[error("Object not found: {key}")]
    NotFound {
        /// Store key that was requested.
        key: String,
    },

    /// Store rejected the request. Not retryable.
    #[error("Store rejected request for {key}: {message}")]
    Rejected {
        /// Store key the operation targeted.
        key: String,
        /// Rejection reason.
        message: String,
    },

    /// Local I/O failure while producing or consuming payload bytes.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// Local path involved.
        path: String,
        /// Underlying failure description.
        message: String,
    },

    /// Operation observed a cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,
}

impl StorageError {
    /// Whether this failure class is retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }
}

/// A chunk whose transfer exhausted retries.
#[derive(Debug)]
pub struct ChunkFailure {
    /// Store key of the failed chunk.
    pub key: String,
    /// The final error after retries.
    pub error: StorageError,
}

/// Errors from a whole upload or download operation.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Manifest proof nodes failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Downloaded bytes do not hash to the requested id. Indicates a
    /// corrupted or untrustworthy payload, never retried.
    #[error("Integrity failure: chunk {key} hashed to {actual}")]
    Integrity {
        /// Store key that was requested.
        key: String,
        /// Digest the received bytes actually produced.
        actual: String,
    },

    /// Local read or write failed. Fatal, not retried.
    #[error("Local I/O error at {path}: {message}")]
    LocalIo {
        /// Local path involved.
        path: String,
        /// Underlying failure description.
        message: String,
    },

    /// One or more chunks exhausted retries. Sibling chunks that already
    /// transferred are not rolled back; re-invoking the operation resumes
    /// safely because the store is content-addressed.
    #[error("{}", format_chunk_failures(.0))]
    ChunksFailed(Vec<ChunkFailure>),

    /// The operation was cancelled before completing.
    #[error("Transfer cancelled")]
    Cancelled,

    /// A transfer worker terminated abnormally.
    #[error("Transfer worker failed: {0}")]
    WorkerPanic(String),
}

fn format_chunk_failures(failures: &[ChunkFailure]) -> String {
    let keys: Vec<&str> = failures.iter().map(|f| f.key.as_str()).collect();
    format!(
        "{} chunk transfer(s) failed after retries: [{}]",
        failures.len(),
        keys.join(", ")
    )
}
