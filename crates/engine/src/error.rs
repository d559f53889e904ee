//! Error types surfaced by the artifact engine.

use thiserror::Error;

use pipeline_artifact_filesystem::FileSystemError;
use pipeline_artifact_model::ManifestError;
use pipeline_artifact_storage::TransferError;

use crate::records::RecordError;

/// Errors from `publish` and `retrieve`.
///
/// Transient network failures are retried inside the transfer engine; by
/// the time an error reaches this level it is final. Each variant carries
/// enough context (chunk id, path, record name) to diagnose without seeing
/// internal call structure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Local path missing or unreadable. Fatal, never retried.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Chunk transfer failure, including integrity failures and exhausted
    /// retries.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Manifest validation or encoding failure.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The metadata service already has a record for this (build, name).
    /// The existing record is left untouched.
    #[error("Artifact '{name}' already exists on build {build_id}")]
    DuplicateArtifact { build_id: u64, name: String },

    /// No record exists for this (build, name).
    #[error("Artifact '{name}' not found on build {build_id}")]
    ArtifactNotFound { build_id: u64, name: String },

    /// The metadata service failed for a reason other than the above.
    #[error("Record service failure: {0}")]
    RecordService(String),

    /// A stored record is missing or carries unparseable fields.
    #[error("Artifact record '{name}' is malformed: {reason}")]
    MalformedRecord { name: String, reason: String },

    /// Retrieval target must be absent or empty before download begins.
    #[error("Retrieval target is not an empty or absent directory: {path}")]
    TargetNotEmpty { path: String },

    /// Local I/O failure outside the transfer path.
    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    /// A background task terminated abnormally.
    #[error("Engine task failed: {0}")]
    Internal(String),
}

impl From<RecordError> for EngineError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::AlreadyExists { build_id, name } => {
                EngineError::DuplicateArtifact { build_id, name }
            }
            RecordError::NotFound { build_id, name } => {
                EngineError::ArtifactNotFound { build_id, name }
            }
            RecordError::Service(message) => EngineError::RecordService(message),
        }
    }
}
