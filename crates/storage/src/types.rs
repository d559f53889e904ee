//! Transfer configuration and request/result types.

use std::path::PathBuf;

use pipeline_artifact_model::ContentId;

use crate::error::StorageError;

/// Workers scheduled per available core.
pub const DEFAULT_WORKERS_PER_CORE: usize = 16;

/// Upper bound on the worker pool, regardless of core count. The remote
/// store enforces its own concurrent-connection limits; fanning out past
/// them degrades throughput.
pub const MAX_TRANSFER_WORKERS: usize = 128;

/// Concurrency policy for chunk transfers.
#[derive(Debug, Clone)]
pub struct TransferSettings {
    /// Maximum chunk operations in flight at once.
    pub concurrency: usize,
}

impl Default for TransferSettings {
    fn default() -> Self {
        let cores: usize = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency: (cores * DEFAULT_WORKERS_PER_CORE).min(MAX_TRANSFER_WORKERS),
        }
    }
}

impl TransferSettings {
    /// Fixed concurrency bound.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }
}

/// Where a chunk's payload bytes come from.
#[derive(Debug, Clone)]
pub enum ChunkData {
    /// A byte range of a local file.
    File {
        /// Absolute path of the backing file.
        path: PathBuf,
        /// Start offset within the file.
        offset: u64,
        /// Range length in bytes.
        length: u64,
    },
    /// Bytes already in memory (manifest blobs, small payloads).
    Bytes(Vec<u8>),
}

impl ChunkData {
    /// Payload length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            ChunkData::File { length, .. } => *length,
            ChunkData::Bytes(bytes) => bytes.len() as u64,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load the payload bytes. Local failures are fatal, never retried.
    pub async fn load(&self) -> Result<Vec<u8>, StorageError> {
        match self {
            ChunkData::Bytes(bytes) => Ok(bytes.clone()),
            ChunkData::File {
                path,
                offset,
                length,
            } => {
                use tokio::io::{AsyncReadExt, AsyncSeekExt};

                let io_err = |e: std::io::Error| StorageError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                };

                let mut file: tokio::fs::File =
                    tokio::fs::File::open(path).await.map_err(io_err)?;
                file.seek(std::io::SeekFrom::Start(*offset))
                    .await
                    .map_err(io_err)?;

                let mut buffer: Vec<u8> = vec![0u8; *length as usize];
                file.read_exact(&mut buffer).await.map_err(io_err)?;
                Ok(buffer)
            }
        }
    }
}

/// One chunk to upload: its id plus where its bytes come from.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    /// Content id of the payload.
    pub id: ContentId,
    /// Payload source.
    pub data: ChunkData,
}

/// Outcome counts for an upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Chunks actually transferred.
    pub uploaded: u64,
    /// Chunks skipped because the store already had them.
    pub deduped: u64,
    /// Bytes actually transferred.
    pub bytes_uploaded: u64,
    /// Bytes skipped via dedup.
    pub bytes_deduped: u64,
}

/// Outcome counts for a download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Files materialized under the target directory.
    pub files_written: u64,
    /// Directories created, including empty ones.
    pub dirs_created: u64,
    /// Chunks fetched from the store (cache hits for shared chunks are not
    /// counted).
    pub chunks_fetched: u64,
    /// Bytes written to disk.
    pub bytes_written: u64,
}
