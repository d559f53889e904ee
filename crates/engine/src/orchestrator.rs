//! Publish/retrieve orchestration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use pipeline_artifact_filesystem::{decompose, scan_tree, DecomposedTree, ScanSummary};
use pipeline_artifact_model::{
    build_manifest, ContentId, HashAlgorithm, Manifest, ProofNode,
};
use pipeline_artifact_storage::{
    BlobStore, ChunkData, ChunkUpload, DownloadSummary, TransferEngine, UploadSummary,
};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::records::{
    ArtifactHandle, ArtifactRecord, BuildRecordService, PROPERTY_PROOF_NODES, PROPERTY_ROOT_ID,
    RESOURCE_TYPE_PIPELINE_ARTIFACT,
};

/// The agent-facing artifact engine.
///
/// Wires the chunker, manifest builder, and transfer engine together, and
/// persists results against the external metadata service.
pub struct ArtifactEngine<S, R> {
    transfer: TransferEngine<S>,
    records: Arc<R>,
    config: EngineConfig,
}

impl<S: BlobStore + 'static, R: BuildRecordService> ArtifactEngine<S, R> {
    /// Create an engine over a content store and a record service.
    pub fn new(store: Arc<S>, records: Arc<R>, config: EngineConfig) -> Self {
        let transfer: TransferEngine<S> = TransferEngine::new(
            store,
            config.transfer.clone(),
            config.retry.clone(),
        );
        Self {
            transfer,
            records,
            config,
        }
    }

    /// Publish a directory tree as a named build artifact.
    ///
    /// Decomposes the tree, uploads chunks the store doesn't already have,
    /// stores the manifest blob, and creates exactly one artifact record
    /// for (build, name) carrying the root id, proof nodes, and manifest
    /// id.
    ///
    /// # Errors
    /// - `EngineError::FileSystem` if `source` is missing or unreadable
    /// - `EngineError::DuplicateArtifact` if a record for (build, name)
    ///   already exists; the existing record is not altered
    /// - `EngineError::Transfer` if chunk uploads exhaust retries
    pub async fn publish(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
        source: &Path,
        cancel: &CancellationToken,
    ) -> Result<ArtifactHandle, EngineError> {
        let scan: ScanSummary = scan_tree(source)?;
        info!(
            artifact = name,
            build = build_id,
            files = scan.file_count,
            bytes = scan.total_size,
            source = %source.display(),
            "publishing artifact"
        );

        let algorithm: HashAlgorithm = self.config.hash_algorithm;
        let source_path: PathBuf = source.to_path_buf();
        let tree: DecomposedTree =
            tokio::task::spawn_blocking(move || decompose(&source_path, algorithm))
                .await
                .map_err(|e| EngineError::Internal(e.to_string()))??;

        let manifest: Manifest = build_manifest(&tree.root, algorithm);
        let manifest_id: ContentId = manifest.id();

        let uploads: Vec<ChunkUpload> = tree
            .chunk_sources
            .into_iter()
            .map(|(hash, chunk)| ChunkUpload {
                id: ContentId::from_hash(hash, algorithm),
                data: ChunkData::File {
                    path: chunk.path,
                    offset: chunk.offset,
                    length: chunk.length,
                },
            })
            .collect();

        let summary: UploadSummary = self.transfer.upload(uploads, cancel).await?;
        self.transfer.upload_manifest(&manifest, cancel).await?;

        let proof_nodes: String = serde_json::to_string(manifest.proof_nodes())
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let mut properties: HashMap<String, String> = HashMap::new();
        properties.insert(PROPERTY_ROOT_ID.to_string(), manifest.root_id().as_key());
        properties.insert(PROPERTY_PROOF_NODES.to_string(), proof_nodes);

        self.records
            .create_record(
                project_id,
                build_id,
                name,
                RESOURCE_TYPE_PIPELINE_ARTIFACT,
                &manifest_id.as_key(),
                properties,
            )
            .await?;

        info!(
            artifact = name,
            build = build_id,
            manifest = %manifest_id,
            uploaded = summary.uploaded,
            deduped = summary.deduped,
            "artifact published and associated with build"
        );

        Ok(ArtifactHandle {
            manifest_id,
            project_id: project_id.to_string(),
            build_id,
            name: name.to_string(),
        })
    }

    /// Retrieve a named build artifact into `target_dir`.
    ///
    /// `target_dir` must be absent or empty; retrieval never merges with
    /// pre-existing files.
    ///
    /// # Errors
    /// - `EngineError::ArtifactNotFound` if no record exists for
    ///   (build, name)
    /// - `EngineError::TargetNotEmpty` if the precondition is violated
    /// - `EngineError::Transfer` on integrity failures or exhausted retries
    pub async fn retrieve(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadSummary, EngineError> {
        ensure_target_available(target_dir).await?;

        let record: ArtifactRecord = self
            .records
            .get_record(project_id, build_id, name)
            .await?;
        let manifest: Manifest = self.manifest_from_record(&record, cancel).await?;

        info!(
            artifact = name,
            build = build_id,
            manifest = %record.data,
            bytes = manifest.total_size(),
            target = %target_dir.display(),
            "retrieving artifact"
        );

        let summary: DownloadSummary = self
            .transfer
            .download(&manifest, target_dir, cancel)
            .await?;

        info!(
            artifact = name,
            build = build_id,
            files = summary.files_written,
            bytes = summary.bytes_written,
            "artifact retrieved"
        );
        Ok(summary)
    }

    /// Reassemble the manifest from record properties when present (the
    /// common path, no store round trip), otherwise fetch the manifest
    /// blob by id and verify it.
    async fn manifest_from_record(
        &self,
        record: &ArtifactRecord,
        cancel: &CancellationToken,
    ) -> Result<Manifest, EngineError> {
        let root_id: Option<&String> = record.properties.get(PROPERTY_ROOT_ID);
        let proof_nodes: Option<&String> = record.properties.get(PROPERTY_PROOF_NODES);

        if let (Some(root_id), Some(proof_nodes)) = (root_id, proof_nodes) {
            let root_id: ContentId = ContentId::parse(root_id)?;
            let proof_nodes: Vec<ProofNode> = serde_json::from_str(proof_nodes)
                .map_err(|e| EngineError::MalformedRecord {
                    name: record.name.clone(),
                    reason: format!("unparseable {}: {}", PROPERTY_PROOF_NODES, e),
                })?;
            return Ok(Manifest::from_proof_nodes(root_id, proof_nodes)?);
        }

        let manifest_id: ContentId = ContentId::parse(&record.data)?;
        Ok(self.transfer.fetch_manifest(&manifest_id, cancel).await?)
    }
}

/// The target must be absent, or an empty directory; anything else makes
/// the result of a retrieve ambiguous.
async fn ensure_target_available(target_dir: &Path) -> Result<(), EngineError> {
    let io_err = |e: std::io::Error| EngineError::Io {
        path: target_dir.display().to_string(),
        message: e.to_string(),
    };

    let metadata: std::fs::Metadata = match tokio::fs::metadata(target_dir).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(e)),
    };
    if !metadata.is_dir() {
        return Err(EngineError::TargetNotEmpty {
            path: target_dir.display().to_string(),
        });
    }

    let mut entries: tokio::fs::ReadDir =
        tokio::fs::read_dir(target_dir).await.map_err(io_err)?;
    if entries.next_entry().await.map_err(io_err)?.is_some() {
        return Err(EngineError::TargetNotEmpty {
            path: target_dir.display().to_string(),
        });
    }
    Ok(())
}
