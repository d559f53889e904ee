//! Local filesystem decomposition for the artifact engine.
//!
//! Splits a directory tree into content-addressed chunks and nodes:
//!
//! - `scan` - lightweight walkdir pre-pass for file/byte totals
//! - `chunk` - deterministic fixed-size chunk boundaries
//! - `decompose` - full tree decomposition into a [`Node`] tree plus the
//!   local byte ranges backing every distinct chunk
//!
//! All failures here are local precondition violations (missing or
//! unreadable paths), never retried.
//!
//! [`Node`]: pipeline_artifact_model::Node

pub mod chunk;
pub mod decompose;
pub mod error;
pub mod scan;

pub use chunk::{chunk_boundaries, expected_chunk_count, needs_chunking};
pub use decompose::{decompose, ChunkSource, DecomposedTree};
pub use error::FileSystemError;
pub use scan::{scan_tree, ScanSummary};
