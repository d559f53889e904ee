//! Engine configuration.
//!
//! Everything tunable is explicit and passed at construction; nothing is
//! read from the process environment at call time.

use pipeline_artifact_model::HashAlgorithm;
use pipeline_artifact_storage::{RetrySettings, TransferSettings};

/// Construction-time configuration for [`ArtifactEngine`].
///
/// [`ArtifactEngine`]: crate::ArtifactEngine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Algorithm for all chunk, node, and manifest ids.
    pub hash_algorithm: HashAlgorithm,
    /// Concurrency policy for chunk transfers.
    pub transfer: TransferSettings,
    /// Retry policy for transient store failures.
    pub retry: RetrySettings,
}
