//! Blob store trait and in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;

use pipeline_artifact_model::ContentId;

use crate::error::StorageError;

/// The boundary to the remote content-addressable store.
///
/// Every operation is keyed by `ContentId`, idempotent, and individually
/// retryable: racing writers of the same id are safe because equal ids imply
/// equal bytes.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether content with this id is already stored.
    async fn contains(&self, id: &ContentId) -> Result<bool, StorageError>;

    /// Store content under its id. Overwriting an existing id with the same
    /// bytes is a no-op.
    async fn put(&self, id: &ContentId, data: &[u8]) -> Result<(), StorageError>;

    /// Fetch content by id.
    ///
    /// # Errors
    /// `StorageError::NotFound` if the id is not stored.
    async fn get(&self, id: &ContentId) -> Result<Vec<u8>, StorageError>;
}

/// In-memory blob store.
///
/// Backs tests and local runs; also the reference for how little a store
/// needs to provide.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Replace the bytes stored under an id without re-keying.
    ///
    /// Simulates a store fault: the key stays valid but the payload no
    /// longer hashes to it. Download integrity verification must catch this.
    pub fn corrupt(&self, id: &ContentId, bytes: Vec<u8>) {
        self.objects.insert(id.as_key(), bytes);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn contains(&self, id: &ContentId) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(&id.as_key()))
    }

    async fn put(&self, id: &ContentId, data: &[u8]) -> Result<(), StorageError> {
        self.objects.insert(id.as_key(), data.to_vec());
        Ok(())
    }

    async fn get(&self, id: &ContentId) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(&id.as_key())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound { key: id.as_key() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_artifact_model::HashAlgorithm;

    #[tokio::test]
    async fn test_memory_store_put_get() {
        let store: MemoryBlobStore = MemoryBlobStore::new();
        let id: ContentId = ContentId::of(b"payload", HashAlgorithm::Xxh128);

        assert!(!store.contains(&id).await.unwrap());
        store.put(&id, b"payload").await.unwrap();
        assert!(store.contains(&id).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap(), b"payload");
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_get_missing() {
        let store: MemoryBlobStore = MemoryBlobStore::new();
        let id: ContentId = ContentId::of(b"absent", HashAlgorithm::Xxh128);
        assert!(matches!(
            store.get(&id).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_same_id_is_idempotent() {
        let store: MemoryBlobStore = MemoryBlobStore::new();
        let id: ContentId = ContentId::of(b"same", HashAlgorithm::Xxh128);
        store.put(&id, b"same").await.unwrap();
        store.put(&id, b"same").await.unwrap();
        assert_eq!(store.object_count(), 1);
    }
}
