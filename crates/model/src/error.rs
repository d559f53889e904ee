//! Error types for manifest and node operations.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or validating manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error("Invalid content id: {0}")]
    InvalidContentId(String),

    #[error("Proof node claims id {claimed} but its description hashes to {actual}")]
    ProofNodeMismatch { claimed: String, actual: String },

    #[error("Manifest root node {id} not present in proof nodes")]
    MissingRootNode { id: String },

    #[error("Tree child '{name}' references node {id} not present in proof nodes")]
    MissingChildNode { name: String, id: String },

    #[error("Tree node {id} has child name '{name}' which is not a valid path component")]
    InvalidChildName { name: String, id: String },

    #[error("Node description for {id} is not valid: {reason}")]
    InvalidNodeDescription { id: String, reason: String },
}
