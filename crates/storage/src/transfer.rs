//! Chunk transfer engine: dedup-checked uploads and verified downloads.
//!
//! All network-bound chunk operations run on a bounded worker pool
//! (`Semaphore` permits over spawned tasks). Independent chunks have no
//! required relative order; correctness under arbitrary interleaving comes
//! from content addressing, which makes every store operation idempotent.
//!
//! Cancellation is cooperative: the token is checked before each chunk
//! operation and during retry backoff, so no chunk transfer spans an
//! unbounded duration without yielding to a cancellation check.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pipeline_artifact_model::{
    ContentId, FileEntry, HashAlgorithm, Manifest, NodeIndex, TreeListing,
};

use crate::check_cache::PresenceCache;
use crate::error::{ChunkFailure, StorageError, TransferError};
use crate::retry::{with_retry, RetrySettings};
use crate::store::BlobStore;
use crate::types::{ChunkUpload, DownloadSummary, TransferSettings, UploadSummary};

/// Uploads and downloads chunk payloads against a [`BlobStore`].
pub struct TransferEngine<S> {
    store: Arc<S>,
    settings: TransferSettings,
    retry: RetrySettings,
    presence: PresenceCache,
}

enum UploadOutcome {
    Uploaded(u64),
    Deduped(u64),
    Cancelled,
    Integrity { key: String, actual: String },
    Failed(ChunkFailure),
}

enum FileOutcome {
    Written { bytes: u64 },
    Cancelled,
    Integrity { key: String, actual: String },
    LocalIo { path: String, message: String },
    Failed(ChunkFailure),
    Panicked(String),
}

enum ChunkFetch {
    Ready { index: usize, bytes: Arc<Vec<u8>> },
    Cancelled,
    Integrity { key: String, actual: String },
    Failed(ChunkFailure),
}

impl<S: BlobStore + 'static> TransferEngine<S> {
    /// Create an engine over a store with explicit concurrency and retry
    /// policies.
    pub fn new(store: Arc<S>, settings: TransferSettings, retry: RetrySettings) -> Self {
        Self {
            store,
            settings,
            retry,
            presence: PresenceCache::new(),
        }
    }

    /// The concurrency policy in effect.
    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Upload chunks, skipping those the store already has.
    ///
    /// Duplicate ids in the request collapse locally before any network
    /// traffic; each distinct chunk is uploaded at most once. Chunks the
    /// store reports present count as deduped - that existence check is the
    /// core cost-saving guarantee.
    ///
    /// Loaded bytes are re-hashed against the claimed id before any put, so
    /// a source file mutated after its id was computed cannot poison the
    /// store.
    ///
    /// # Errors
    /// - `TransferError::LocalIo` if a chunk's backing bytes are unreadable
    /// - `TransferError::Integrity` if a chunk's bytes no longer hash to
    ///   its id
    /// - `TransferError::ChunksFailed` naming every chunk that exhausted
    ///   retries; completed siblings are not rolled back
    /// - `TransferError::Cancelled` if the token fires first
    pub async fn upload(
        &self,
        chunks: Vec<ChunkUpload>,
        cancel: &CancellationToken,
    ) -> Result<UploadSummary, TransferError> {
        let mut seen: HashSet<String> = HashSet::new();
        let distinct: Vec<ChunkUpload> = chunks
            .into_iter()
            .filter(|c| seen.insert(c.id.as_key()))
            .collect();

        debug!(chunks = distinct.len(), "starting chunk upload");

        let semaphore: Arc<Semaphore> = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks: JoinSet<UploadOutcome> = JoinSet::new();

        for chunk in distinct {
            let store: Arc<S> = self.store.clone();
            let retry: RetrySettings = self.retry.clone();
            let presence: PresenceCache = self.presence.clone();
            let semaphore: Arc<Semaphore> = semaphore.clone();
            let cancel: CancellationToken = cancel.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return UploadOutcome::Cancelled,
                };
                if cancel.is_cancelled() {
                    return UploadOutcome::Cancelled;
                }
                upload_one(store, retry, presence, cancel, chunk).await
            });
        }

        let mut summary: UploadSummary = UploadSummary::default();
        let mut integrity: Option<TransferError> = None;
        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut cancelled: bool = false;

        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| TransferError::WorkerPanic(e.to_string()))? {
                UploadOutcome::Uploaded(bytes) => {
                    summary.uploaded += 1;
                    summary.bytes_uploaded += bytes;
                }
                UploadOutcome::Deduped(bytes) => {
                    summary.deduped += 1;
                    summary.bytes_deduped += bytes;
                }
                UploadOutcome::Cancelled => cancelled = true,
                UploadOutcome::Integrity { key, actual } => {
                    integrity.get_or_insert(TransferError::Integrity { key, actual });
                }
                UploadOutcome::Failed(failure) => failures.push(failure),
            }
        }

        if let Some(error) = integrity {
            return Err(error);
        }
        if let Some(local) = failures
            .iter()
            .position(|f| matches!(f.error, StorageError::Io { .. }))
        {
            let failure: ChunkFailure = failures.swap_remove(local);
            if let StorageError::Io { path, message } = failure.error {
                return Err(TransferError::LocalIo { path, message });
            }
        }
        if !failures.is_empty() {
            return Err(TransferError::ChunksFailed(failures));
        }
        if cancelled {
            return Err(TransferError::Cancelled);
        }

        info!(
            uploaded = summary.uploaded,
            deduped = summary.deduped,
            bytes_uploaded = summary.bytes_uploaded,
            bytes_deduped = summary.bytes_deduped,
            "chunk upload complete"
        );
        Ok(summary)
    }

    /// Store a manifest blob under its own id, skipping if present.
    pub async fn upload_manifest(
        &self,
        manifest: &Manifest,
        cancel: &CancellationToken,
    ) -> Result<(), TransferError> {
        let encoded: String = manifest.encode();
        let id: ContentId = manifest.id();
        let upload: ChunkUpload = ChunkUpload {
            id,
            data: crate::types::ChunkData::Bytes(encoded.into_bytes()),
        };
        self.upload(vec![upload], cancel).await.map(|_| ())
    }

    /// Fetch a manifest blob by id, verifying its bytes hash to the id
    /// before decoding.
    pub async fn fetch_manifest(
        &self,
        id: &ContentId,
        cancel: &CancellationToken,
    ) -> Result<Manifest, TransferError> {
        let key: String = id.as_key();
        let store: Arc<S> = self.store.clone();
        let fetch_id: ContentId = id.clone();
        let bytes: Vec<u8> = with_retry(&self.retry, cancel, &key, move || {
            let store = store.clone();
            let id = fetch_id.clone();
            async move { store.get(&id).await }
        })
        .await
        .map_err(|e| map_storage_error(&key, e))?;

        let actual: String = id.algorithm().digest(&bytes);
        if actual != id.hash() {
            return Err(TransferError::Integrity { key, actual });
        }

        let text: String = String::from_utf8(bytes).map_err(|_| TransferError::Integrity {
            key: id.as_key(),
            actual: "non-utf8 manifest payload".to_string(),
        })?;
        Ok(Manifest::decode(&text)?)
    }

    /// Download a manifest's tree under `target_dir`.
    ///
    /// Proof nodes are validated first; chunk fetches begin only once the
    /// full set of required ids is known. Every received chunk is re-hashed
    /// against its requested id before use - a mismatch is fatal and aborts
    /// the download. Files materialize atomically (temp file, then rename)
    /// only after all their chunks verify, so a failed file is either
    /// absent or fully written. Every chunk fetch goes through the same
    /// bounded pool whether the chunks belong to one file or many, and
    /// chunks referenced by multiple files are shared after their first
    /// verified fetch.
    pub async fn download(
        &self,
        manifest: &Manifest,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadSummary, TransferError> {
        let index: NodeIndex = NodeIndex::from_manifest(manifest)?;
        let listing: TreeListing = index.walk()?;
        let algorithm: HashAlgorithm = manifest.hash_alg();

        debug!(
            files = listing.files.len(),
            dirs = listing.dirs.len(),
            bytes = listing.total_size,
            "starting manifest download"
        );

        let mut summary: DownloadSummary = DownloadSummary::default();

        tokio::fs::create_dir_all(target_dir)
            .await
            .map_err(|e| TransferError::LocalIo {
                path: target_dir.display().to_string(),
                message: e.to_string(),
            })?;
        for dir in &listing.dirs {
            let path: PathBuf = join_relative(target_dir, dir);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| TransferError::LocalIo {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            summary.dirs_created += 1;
        }

        // Chunks referenced by more than one file are cached after their
        // first verified fetch.
        let mut refcounts: HashMap<String, usize> = HashMap::new();
        for file in &listing.files {
            for chunk in &file.chunks {
                *refcounts.entry(chunk.as_key()).or_insert(0) += 1;
            }
        }
        let shared_keys: Arc<HashSet<String>> = Arc::new(
            refcounts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(key, _)| key)
                .collect(),
        );
        let shared_chunks: Arc<dashmap::DashMap<String, Arc<Vec<u8>>>> =
            Arc::new(dashmap::DashMap::new());
        // Distinct keys actually fetched from the store; shared-chunk cache
        // hits do not register here.
        let fetched_keys: Arc<dashmap::DashSet<String>> = Arc::new(dashmap::DashSet::new());

        // Child token lets an integrity failure abort sibling fetches.
        let local_cancel: CancellationToken = cancel.child_token();
        let semaphore: Arc<Semaphore> = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut tasks: JoinSet<FileOutcome> = JoinSet::new();

        for file in listing.files {
            let store: Arc<S> = self.store.clone();
            let retry: RetrySettings = self.retry.clone();
            let semaphore: Arc<Semaphore> = semaphore.clone();
            let cancel: CancellationToken = local_cancel.clone();
            let shared_keys: Arc<HashSet<String>> = shared_keys.clone();
            let shared_chunks: Arc<dashmap::DashMap<String, Arc<Vec<u8>>>> =
                shared_chunks.clone();
            let fetched_keys: Arc<dashmap::DashSet<String>> = fetched_keys.clone();
            let target: PathBuf = join_relative(target_dir, &file.path);

            tasks.spawn(async move {
                download_file(
                    store,
                    retry,
                    semaphore,
                    cancel,
                    algorithm,
                    file,
                    target,
                    shared_keys,
                    shared_chunks,
                    fetched_keys,
                )
                .await
            });
        }

        let mut integrity: Option<TransferError> = None;
        let mut local_io: Option<TransferError> = None;
        let mut failures: Vec<ChunkFailure> = Vec::new();
        let mut cancelled: bool = false;

        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| TransferError::WorkerPanic(e.to_string()))? {
                FileOutcome::Written { bytes } => {
                    summary.files_written += 1;
                    summary.bytes_written += bytes;
                }
                FileOutcome::Integrity { key, actual } => {
                    integrity.get_or_insert(TransferError::Integrity { key, actual });
                }
                FileOutcome::LocalIo { path, message } => {
                    local_io.get_or_insert(TransferError::LocalIo { path, message });
                }
                FileOutcome::Failed(failure) => failures.push(failure),
                FileOutcome::Cancelled => cancelled = true,
                FileOutcome::Panicked(message) => {
                    return Err(TransferError::WorkerPanic(message))
                }
            }
        }
        summary.chunks_fetched = fetched_keys.len() as u64;

        if let Some(error) = integrity {
            return Err(error);
        }
        if let Some(error) = local_io {
            return Err(error);
        }
        if !failures.is_empty() {
            return Err(TransferError::ChunksFailed(failures));
        }
        if cancelled {
            return Err(TransferError::Cancelled);
        }

        info!(
            files = summary.files_written,
            dirs = summary.dirs_created,
            chunks = summary.chunks_fetched,
            bytes = summary.bytes_written,
            "manifest download complete"
        );
        Ok(summary)
    }
}

async fn upload_one<S: BlobStore>(
    store: Arc<S>,
    retry: RetrySettings,
    presence: PresenceCache,
    cancel: CancellationToken,
    chunk: ChunkUpload,
) -> UploadOutcome {
    let key: String = chunk.id.as_key();
    let size: u64 = chunk.data.len();

    if presence.contains(&key) {
        return UploadOutcome::Deduped(size);
    }

    let check_store: Arc<S> = store.clone();
    let check_id: ContentId = chunk.id.clone();
    let exists: bool = match with_retry(&retry, &cancel, &key, move || {
        let store = check_store.clone();
        let id = check_id.clone();
        async move { store.contains(&id).await }
    })
    .await
    {
        Ok(exists) => exists,
        Err(StorageError::Cancelled) => return UploadOutcome::Cancelled,
        Err(error) => return UploadOutcome::Failed(ChunkFailure { key, error }),
    };

    if exists {
        presence.mark_present(&key);
        debug!(chunk = %key, "chunk already present, skipping upload");
        return UploadOutcome::Deduped(size);
    }

    let bytes: Arc<Vec<u8>> = match chunk.data.load().await {
        Ok(bytes) => Arc::new(bytes),
        Err(error) => return UploadOutcome::Failed(ChunkFailure { key, error }),
    };

    // The id was computed when the source was decomposed; if the backing
    // file changed since, storing these bytes would poison the id for every
    // future artifact that dedups against it.
    let actual: String = chunk.id.algorithm().digest(&bytes);
    if actual != chunk.id.hash() {
        return UploadOutcome::Integrity { key, actual };
    }

    let put_id: ContentId = chunk.id.clone();
    match with_retry(&retry, &cancel, &key, move || {
        let store = store.clone();
        let id = put_id.clone();
        let bytes = bytes.clone();
        async move { store.put(&id, &bytes).await }
    })
    .await
    {
        Ok(()) => {
            presence.mark_present(&key);
            debug!(chunk = %key, bytes = size, "chunk uploaded");
            UploadOutcome::Uploaded(size)
        }
        Err(StorageError::Cancelled) => UploadOutcome::Cancelled,
        Err(error) => UploadOutcome::Failed(ChunkFailure { key, error }),
    }
}

/// Fetch one file's chunks through the bounded pool and assemble them in
/// file order.
///
/// Every chunk fetch is its own pool task, so a single large file saturates
/// the worker pool the same way many small files do. Assembly and the
/// atomic temp-file write happen off the async workers once all chunks have
/// verified.
#[allow(clippy::too_many_arguments)]
async fn download_file<S: BlobStore + 'static>(
    store: Arc<S>,
    retry: RetrySettings,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    algorithm: HashAlgorithm,
    file: FileEntry,
    target: PathBuf,
    shared_keys: Arc<HashSet<String>>,
    shared_chunks: Arc<dashmap::DashMap<String, Arc<Vec<u8>>>>,
    fetched_keys: Arc<dashmap::DashSet<String>>,
) -> FileOutcome {
    let parent: PathBuf = match target.parent() {
        Some(parent) => parent.to_path_buf(),
        None => {
            return FileOutcome::LocalIo {
                path: target.display().to_string(),
                message: "target path has no parent directory".to_string(),
            }
        }
    };

    let mut fetches: JoinSet<ChunkFetch> = JoinSet::new();
    for (index, chunk_id) in file.chunks.iter().enumerate() {
        let store: Arc<S> = store.clone();
        let retry: RetrySettings = retry.clone();
        let semaphore: Arc<Semaphore> = semaphore.clone();
        let cancel: CancellationToken = cancel.clone();
        let shared_keys: Arc<HashSet<String>> = shared_keys.clone();
        let shared_chunks: Arc<dashmap::DashMap<String, Arc<Vec<u8>>>> = shared_chunks.clone();
        let fetched_keys: Arc<dashmap::DashSet<String>> = fetched_keys.clone();
        let chunk_id: ContentId = chunk_id.clone();

        fetches.spawn(async move {
            fetch_chunk(
                store,
                retry,
                semaphore,
                cancel,
                algorithm,
                index,
                chunk_id,
                shared_keys,
                shared_chunks,
                fetched_keys,
            )
            .await
        });
    }

    let mut parts: Vec<Option<Arc<Vec<u8>>>> = vec![None; file.chunks.len()];
    while let Some(joined) = fetches.join_next().await {
        match joined {
            Ok(ChunkFetch::Ready { index, bytes }) => parts[index] = Some(bytes),
            Ok(ChunkFetch::Cancelled) => return FileOutcome::Cancelled,
            Ok(ChunkFetch::Integrity { key, actual }) => {
                return FileOutcome::Integrity { key, actual }
            }
            Ok(ChunkFetch::Failed(failure)) => return FileOutcome::Failed(failure),
            Err(e) => return FileOutcome::Panicked(e.to_string()),
        }
    }

    let ordered: Vec<Arc<Vec<u8>>> = parts.into_iter().flatten().collect();
    let bytes_written: u64 = ordered.iter().map(|b| b.len() as u64).sum();

    // The file only becomes visible at its final path once every chunk has
    // been verified and written.
    let write_parent: PathBuf = parent;
    let write_target: PathBuf = target.clone();
    let write = tokio::task::spawn_blocking(move || -> Result<(), (String, String)> {
        let mut temp: tempfile::NamedTempFile = tempfile::NamedTempFile::new_in(&write_parent)
            .map_err(|e| (write_parent.display().to_string(), e.to_string()))?;
        for part in &ordered {
            temp.write_all(part)
                .map_err(|e| (write_target.display().to_string(), e.to_string()))?;
        }
        temp.persist(&write_target)
            .map_err(|e| (write_target.display().to_string(), e.to_string()))?;
        Ok(())
    })
    .await;

    match write {
        Ok(Ok(())) => FileOutcome::Written {
            bytes: bytes_written,
        },
        Ok(Err((path, message))) => FileOutcome::LocalIo { path, message },
        Err(e) => FileOutcome::Panicked(e.to_string()),
    }
}

#[allow(clippy::too_many_arguments)]
async fn fetch_chunk<S: BlobStore>(
    store: Arc<S>,
    retry: RetrySettings,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    algorithm: HashAlgorithm,
    index: usize,
    chunk_id: ContentId,
    shared_keys: Arc<HashSet<String>>,
    shared_chunks: Arc<dashmap::DashMap<String, Arc<Vec<u8>>>>,
    fetched_keys: Arc<dashmap::DashSet<String>>,
) -> ChunkFetch {
    let key: String = chunk_id.as_key();

    if let Some(cached) = shared_chunks.get(&key) {
        return ChunkFetch::Ready {
            index,
            bytes: cached.value().clone(),
        };
    }

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return ChunkFetch::Cancelled,
    };
    if cancel.is_cancelled() {
        return ChunkFetch::Cancelled;
    }
    // A sibling may have fetched and cached this chunk while we waited for
    // a permit.
    if let Some(cached) = shared_chunks.get(&key) {
        return ChunkFetch::Ready {
            index,
            bytes: cached.value().clone(),
        };
    }

    let fetch_store: Arc<S> = store.clone();
    let fetch_id: ContentId = chunk_id.clone();
    let raw: Vec<u8> = match with_retry(&retry, &cancel, &key, move || {
        let store = fetch_store.clone();
        let id = fetch_id.clone();
        async move { store.get(&id).await }
    })
    .await
    {
        Ok(raw) => raw,
        Err(StorageError::Cancelled) => return ChunkFetch::Cancelled,
        Err(error) => return ChunkFetch::Failed(ChunkFailure { key, error }),
    };

    // Verify before anything derived from these bytes touches disk.
    let actual: String = algorithm.digest(&raw);
    if actual != chunk_id.hash() {
        cancel.cancel();
        return ChunkFetch::Integrity { key, actual };
    }

    let verified: Arc<Vec<u8>> = Arc::new(raw);
    fetched_keys.insert(key.clone());
    if shared_keys.contains(&key) {
        shared_chunks.insert(key, verified.clone());
    }
    ChunkFetch::Ready {
        index,
        bytes: verified,
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let mut path: PathBuf = base.to_path_buf();
    for component in relative.split('/') {
        path.push(component);
    }
    path
}

fn map_storage_error(key: &str, error: StorageError) -> TransferError {
    match error {
        StorageError::Cancelled => TransferError::Cancelled,
        StorageError::Io { path, message } => TransferError::LocalIo { path, message },
        other => TransferError::ChunksFailed(vec![ChunkFailure {
            key: key.to_string(),
            error: other,
        }]),
    }
}
