//! Content-addressed artifact model for pipeline builds.
//!
//! This crate provides the data model shared by the chunker, transfer engine,
//! and orchestrator:
//!
//! - `ContentId` / `HashAlgorithm` - deterministic content addressing
//! - `Node` - file and directory tree descriptions with Merkle ids
//! - `Manifest` - root id plus the proof nodes needed to reconstruct a tree
//!   without re-walking the filesystem
//!
//! Everything that is content-addressed serializes to canonical JSON (sorted
//! object keys), so two processes describing an identical tree produce
//! byte-identical descriptions and therefore identical ids.

pub mod error;
pub mod hash;
pub mod manifest;
pub mod node;

pub use error::ManifestError;
pub use hash::{ContentId, HashAlgorithm, CHUNK_SIZE_BYTES};
pub use manifest::{build_manifest, FileEntry, Manifest, NodeIndex, ProofNode, TreeListing};
pub use node::{FileNode, Node, NodeDescription, TreeNode};
