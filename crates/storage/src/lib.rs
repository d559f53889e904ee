//! Storage abstraction and chunk transfer engine for pipeline artifacts.
//!
//! This crate provides:
//!
//! - **`BlobStore`** - the trait boundary to the remote content-addressable
//!   store (existence check, put, get - each keyed by `ContentId`, each
//!   idempotent and individually retryable), plus an in-memory
//!   implementation.
//! - **`PresenceCache`** - process-local cache of ids known to exist
//!   remotely, to avoid redundant existence checks.
//! - **`TransferEngine`** - uploads chunks with dedup and downloads
//!   manifest trees with integrity verification, under bounded parallelism
//!   with per-chunk retry and cooperative cancellation.
//!
//! Transient store failures are retried with bounded backoff; integrity
//! failures and local I/O failures are fatal and never retried.

pub mod check_cache;
pub mod error;
pub mod retry;
pub mod store;
pub mod transfer;
pub mod types;

pub use check_cache::PresenceCache;
pub use error::{ChunkFailure, StorageError, TransferError};
pub use retry::{with_retry, RetrySettings};
pub use store::{BlobStore, MemoryBlobStore};
pub use transfer::TransferEngine;
pub use types::{
    ChunkData, ChunkUpload, DownloadSummary, TransferSettings, UploadSummary,
    DEFAULT_WORKERS_PER_CORE, MAX_TRANSFER_WORKERS,
};
