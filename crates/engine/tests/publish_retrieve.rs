//! End-to-end publish/retrieve scenarios over in-memory collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use pipeline_artifact_engine::{
    ArtifactEngine, EngineConfig, EngineError, MemoryRecordService,
};
use pipeline_artifact_model::{ContentId, HashAlgorithm};
use pipeline_artifact_storage::{
    BlobStore, DownloadSummary, MemoryBlobStore, RetrySettings, TransferError, TransferSettings,
};

struct Fixture {
    store: Arc<MemoryBlobStore>,
    records: Arc<MemoryRecordService>,
    engine: ArtifactEngine<MemoryBlobStore, MemoryRecordService>,
    cancel: CancellationToken,
}

fn fixture() -> Fixture {
    let store: Arc<MemoryBlobStore> = Arc::new(MemoryBlobStore::new());
    let records: Arc<MemoryRecordService> = Arc::new(MemoryRecordService::new());
    let config: EngineConfig = EngineConfig {
        hash_algorithm: HashAlgorithm::Xxh128,
        transfer: TransferSettings::with_concurrency(4),
        retry: RetrySettings::none(),
    };
    let engine: ArtifactEngine<MemoryBlobStore, MemoryRecordService> =
        ArtifactEngine::new(store.clone(), records.clone(), config);
    Fixture {
        store,
        records,
        engine,
        cancel: CancellationToken::new(),
    }
}

/// Tree with shared content, an empty file, and an empty directory.
fn sample_source() -> TempDir {
    let dir: TempDir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("readme.md"), b"hello").unwrap();
    std::fs::create_dir(dir.path().join("bin")).unwrap();
    std::fs::write(dir.path().join("bin/copy.md"), b"hello").unwrap();
    std::fs::write(dir.path().join("bin/tool"), b"\x7fELF unique bytes").unwrap();
    std::fs::write(dir.path().join("empty.log"), b"").unwrap();
    std::fs::create_dir(dir.path().join("hollow")).unwrap();
    dir
}

fn assert_matches_sample(target: &Path) {
    assert_eq!(std::fs::read(target.join("readme.md")).unwrap(), b"hello");
    assert_eq!(std::fs::read(target.join("bin/copy.md")).unwrap(), b"hello");
    assert_eq!(
        std::fs::read(target.join("bin/tool")).unwrap(),
        b"\x7fELF unique bytes"
    );
    assert_eq!(std::fs::read(target.join("empty.log")).unwrap(), b"");
    assert!(target.join("hollow").is_dir());
}

#[tokio::test]
async fn test_publish_then_retrieve_round_trip() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();

    let handle = fx
        .engine
        .publish("proj", 42, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();
    assert_eq!(handle.build_id, 42);
    assert_eq!(handle.name, "drop");

    let target: TempDir = TempDir::new().unwrap();
    let summary: DownloadSummary = fx
        .engine
        .retrieve("proj", 42, "drop", target.path(), &fx.cancel)
        .await
        .unwrap();

    assert_eq!(summary.files_written, 4);
    // "hello" backs two files but is fetched once.
    assert_eq!(summary.chunks_fetched, 2);
    assert_matches_sample(target.path());
}

#[tokio::test]
async fn test_republishing_identical_tree_stores_nothing_new() {
    let fx: Fixture = fixture();
    let source_a: TempDir = sample_source();
    let source_b: TempDir = sample_source();

    let first = fx
        .engine
        .publish("proj", 1, "drop", source_a.path(), &fx.cancel)
        .await
        .unwrap();
    let objects_after_first: usize = fx.store.object_count();

    let second = fx
        .engine
        .publish("proj", 2, "drop", source_b.path(), &fx.cancel)
        .await
        .unwrap();

    // Identical trees yield the identical manifest, and the second publish
    // uploads zero new objects.
    assert_eq!(first.manifest_id, second.manifest_id);
    assert_eq!(fx.store.object_count(), objects_after_first);
    assert_eq!(fx.records.record_count(), 2);
}

#[tokio::test]
async fn test_duplicate_artifact_name_is_rejected() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();

    fx.engine
        .publish("proj", 7, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();

    let other: TempDir = TempDir::new().unwrap();
    std::fs::write(other.path().join("different.txt"), b"different").unwrap();
    let result = fx
        .engine
        .publish("proj", 7, "drop", other.path(), &fx.cancel)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::DuplicateArtifact { build_id: 7, .. })
    ));

    // The original record still resolves to the original content.
    let target: TempDir = TempDir::new().unwrap();
    fx.engine
        .retrieve("proj", 7, "drop", target.path(), &fx.cancel)
        .await
        .unwrap();
    assert_matches_sample(target.path());
    assert!(!target.path().join("different.txt").exists());
}

#[tokio::test]
async fn test_retrieve_unknown_artifact() {
    let fx: Fixture = fixture();
    let target: TempDir = TempDir::new().unwrap();

    let result = fx
        .engine
        .retrieve("proj", 99, "missing", target.path(), &fx.cancel)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::ArtifactNotFound { build_id: 99, .. })
    ));
}

#[tokio::test]
async fn test_retrieve_refuses_populated_target() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();
    fx.engine
        .publish("proj", 1, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();

    let target: TempDir = TempDir::new().unwrap();
    std::fs::write(target.path().join("precious.txt"), b"keep me").unwrap();

    let result = fx
        .engine
        .retrieve("proj", 1, "drop", target.path(), &fx.cancel)
        .await;
    assert!(matches!(result, Err(EngineError::TargetNotEmpty { .. })));
    assert_eq!(
        std::fs::read(target.path().join("precious.txt")).unwrap(),
        b"keep me"
    );
}

#[tokio::test]
async fn test_corrupted_chunk_fails_retrieve_without_writing() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();
    fx.engine
        .publish("proj", 1, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();

    let id: ContentId = ContentId::of(b"hello", HashAlgorithm::Xxh128);
    fx.store.corrupt(&id, b"tampered".to_vec());

    let target: TempDir = TempDir::new().unwrap();
    let result = fx
        .engine
        .retrieve("proj", 1, "drop", target.path(), &fx.cancel)
        .await;

    assert!(matches!(
        result,
        Err(EngineError::Transfer(TransferError::Integrity { .. }))
    ));
    assert!(!target.path().join("readme.md").exists());
    assert!(!target.path().join("bin/copy.md").exists());
}

#[tokio::test]
async fn test_publish_resumes_over_already_stored_chunks() {
    let fx: Fixture = fixture();

    // One chunk from a previous, interrupted attempt is already stored.
    let existing: ContentId = ContentId::of(b"hello", HashAlgorithm::Xxh128);
    fx.store.put(&existing, b"hello").await.unwrap();
    assert_eq!(fx.store.object_count(), 1);

    let source: TempDir = sample_source();
    fx.engine
        .publish("proj", 1, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();

    // The pre-stored chunk dedups; only the second chunk and the manifest
    // blob are new.
    assert_eq!(fx.store.object_count(), 3);

    let target: TempDir = TempDir::new().unwrap();
    fx.engine
        .retrieve("proj", 1, "drop", target.path(), &fx.cancel)
        .await
        .unwrap();
    assert_matches_sample(target.path());
}

#[tokio::test]
async fn test_retrieve_falls_back_to_manifest_blob() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();

    let handle = fx
        .engine
        .publish("proj", 1, "drop", source.path(), &fx.cancel)
        .await
        .unwrap();

    // An older record without proof-node properties still resolves through
    // the stored manifest blob.
    use pipeline_artifact_engine::BuildRecordService;
    fx.records
        .create_record(
            "proj",
            1,
            "legacy",
            "PipelineArtifact",
            &handle.manifest_id.as_key(),
            HashMap::new(),
        )
        .await
        .unwrap();

    let target: TempDir = TempDir::new().unwrap();
    fx.engine
        .retrieve("proj", 1, "legacy", target.path(), &fx.cancel)
        .await
        .unwrap();
    assert_matches_sample(target.path());
}

#[tokio::test]
async fn test_retrieve_rejects_record_with_escaping_paths() {
    use std::collections::BTreeMap;

    use pipeline_artifact_engine::{
        BuildRecordService, PROPERTY_PROOF_NODES, PROPERTY_ROOT_ID,
    };
    use pipeline_artifact_model::node::{encode_file_node, encode_tree_node};
    use pipeline_artifact_model::ProofNode;

    let fx: Fixture = fixture();

    // A record whose proof nodes all hash correctly but whose tree names a
    // child above the target directory.
    let chunk: ContentId = ContentId::of(b"gotcha", HashAlgorithm::Xxh128);
    fx.store.put(&chunk, b"gotcha").await.unwrap();

    let file_data: String = encode_file_node(&[chunk], 6);
    let file_id: ContentId = ContentId::of(file_data.as_bytes(), HashAlgorithm::Xxh128);
    let mut children: BTreeMap<String, ContentId> = BTreeMap::new();
    children.insert("../evil.txt".to_string(), file_id.clone());
    let tree_data: String = encode_tree_node(&children);
    let tree_id: ContentId = ContentId::of(tree_data.as_bytes(), HashAlgorithm::Xxh128);

    let proof_nodes: String = serde_json::to_string(&vec![
        ProofNode {
            id: file_id.hash().to_string(),
            data: file_data,
        },
        ProofNode {
            id: tree_id.hash().to_string(),
            data: tree_data,
        },
    ])
    .unwrap();
    let mut properties: HashMap<String, String> = HashMap::new();
    properties.insert(PROPERTY_ROOT_ID.to_string(), tree_id.as_key());
    properties.insert(PROPERTY_PROOF_NODES.to_string(), proof_nodes);

    fx.records
        .create_record(
            "proj",
            1,
            "hostile",
            "PipelineArtifact",
            &tree_id.as_key(),
            properties,
        )
        .await
        .unwrap();

    let outer: TempDir = TempDir::new().unwrap();
    let target: std::path::PathBuf = outer.path().join("target");
    let result = fx
        .engine
        .retrieve("proj", 1, "hostile", &target, &fx.cancel)
        .await;

    assert!(matches!(result, Err(EngineError::Manifest(_))));
    assert!(!outer.path().join("evil.txt").exists());
    assert!(!target.join("evil.txt").exists());
}

#[tokio::test]
async fn test_publish_missing_source_is_fatal() {
    let fx: Fixture = fixture();
    let dir: TempDir = TempDir::new().unwrap();

    let result = fx
        .engine
        .publish("proj", 1, "drop", &dir.path().join("missing"), &fx.cancel)
        .await;
    assert!(matches!(result, Err(EngineError::FileSystem(_))));
    assert_eq!(fx.store.object_count(), 0);
    assert_eq!(fx.records.record_count(), 0);
}

#[tokio::test]
async fn test_cancelled_publish_creates_no_record() {
    let fx: Fixture = fixture();
    let source: TempDir = sample_source();
    fx.cancel.cancel();

    let result = fx
        .engine
        .publish("proj", 1, "drop", source.path(), &fx.cancel)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::Transfer(TransferError::Cancelled))
    ));
    assert_eq!(fx.records.record_count(), 0);
}
