//! Artifact orchestration for a pipeline build agent.
//!
//! The public entry point is [`ArtifactEngine`], which wires the chunker,
//! manifest builder, and transfer engine together and talks to the external
//! metadata service through the [`BuildRecordService`] trait:
//!
//! - `publish` - decompose a source tree, upload missing chunks, and
//!   associate the resulting manifest with a build record
//! - `retrieve` - look up a build record and reconstruct the published tree
//!   byte-identically under a target directory
//!
//! Also provides the directory-ownership marker used to keep two agent
//! installations from colliding on a shared working directory.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ownership;
pub mod records;

pub use config::EngineConfig;
pub use error::EngineError;
pub use orchestrator::ArtifactEngine;
pub use ownership::{DirectoryOwnership, OwnershipError, OwnershipInfo, OWNERSHIP_FILE_NAME};
pub use records::{
    ArtifactHandle, ArtifactRecord, BuildRecordService, MemoryRecordService, RecordError,
    PROPERTY_PROOF_NODES, PROPERTY_ROOT_ID, RESOURCE_TYPE_PIPELINE_ARTIFACT,
};
