//! Build-artifact record types and the metadata service boundary.
//!
//! The record service is an external collaborator: it owns the association
//! between a named artifact and a build, and serializes its own writes per
//! (build, name) key. The engine only produces and consumes records.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use pipeline_artifact_model::ContentId;

/// Record property key holding the string form of the root content id.
///
/// Stable name for compatibility with existing records.
pub const PROPERTY_ROOT_ID: &str = "RootId";

/// Record property key holding the serialized proof node list.
///
/// Stable name for compatibility with existing records.
pub const PROPERTY_PROOF_NODES: &str = "ProofNodes";

/// Resource type tag for records created by this engine.
pub const RESOURCE_TYPE_PIPELINE_ARTIFACT: &str = "PipelineArtifact";

/// Handle returned by a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// Id of the published manifest blob.
    pub manifest_id: ContentId,
    /// Project the build belongs to.
    pub project_id: String,
    /// Build the artifact is associated with.
    pub build_id: u64,
    /// Artifact name, unique per build.
    pub name: String,
}

/// A named association between an artifact and a build, as stored by the
/// metadata service.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    /// Project the build belongs to.
    pub project_id: String,
    /// Build the artifact is associated with.
    pub build_id: u64,
    /// Artifact name, unique per build.
    pub name: String,
    /// Resource type tag.
    pub resource_type: String,
    /// Resource payload: string form of the manifest id.
    pub data: String,
    /// Properties map carrying `RootId` and `ProofNodes`.
    pub properties: HashMap<String, String>,
}

/// Errors from the metadata service.
#[derive(Debug, Error)]
pub enum RecordError {
    /// A record already exists for this (build, name).
    #[error("Artifact record already exists for build {build_id} name '{name}'")]
    AlreadyExists { build_id: u64, name: String },

    /// No record exists for this (build, name).
    #[error("Artifact record not found for build {build_id} name '{name}'")]
    NotFound { build_id: u64, name: String },

    /// Any other service failure.
    #[error("Record service failure: {0}")]
    Service(String),
}

/// The boundary to the external metadata/record service.
#[async_trait]
pub trait BuildRecordService: Send + Sync {
    /// Create exactly one record for (build, name).
    ///
    /// # Errors
    /// `RecordError::AlreadyExists` if a record for this (build, name) is
    /// already present; the existing record is not modified.
    async fn create_record(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
        resource_type: &str,
        data: &str,
        properties: HashMap<String, String>,
    ) -> Result<ArtifactRecord, RecordError>;

    /// Fetch the record for (build, name).
    ///
    /// # Errors
    /// `RecordError::NotFound` if no record exists.
    async fn get_record(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
    ) -> Result<ArtifactRecord, RecordError>;
}

/// In-memory record service enforcing (build, name) uniqueness.
#[derive(Debug, Default)]
pub struct MemoryRecordService {
    records: DashMap<(String, u64, String), ArtifactRecord>,
}

impl MemoryRecordService {
    /// Create a new empty service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl BuildRecordService for MemoryRecordService {
    async fn create_record(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
        resource_type: &str,
        data: &str,
        properties: HashMap<String, String>,
    ) -> Result<ArtifactRecord, RecordError> {
        let key: (String, u64, String) = (project_id.to_string(), build_id, name.to_string());
        match self.records.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RecordError::AlreadyExists {
                build_id,
                name: name.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let record: ArtifactRecord = ArtifactRecord {
                    project_id: project_id.to_string(),
                    build_id,
                    name: name.to_string(),
                    resource_type: resource_type.to_string(),
                    data: data.to_string(),
                    properties,
                };
                entry.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get_record(
        &self,
        project_id: &str,
        build_id: u64,
        name: &str,
    ) -> Result<ArtifactRecord, RecordError> {
        let key: (String, u64, String) = (project_id.to_string(), build_id, name.to_string());
        self.records
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RecordError::NotFound {
                build_id,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_get() {
        let service: MemoryRecordService = MemoryRecordService::new();
        service
            .create_record(
                "proj",
                7,
                "drop",
                RESOURCE_TYPE_PIPELINE_ARTIFACT,
                "abc.xxh128",
                HashMap::new(),
            )
            .await
            .unwrap();

        let record: ArtifactRecord = service.get_record("proj", 7, "drop").await.unwrap();
        assert_eq!(record.data, "abc.xxh128");
        assert_eq!(record.resource_type, RESOURCE_TYPE_PIPELINE_ARTIFACT);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected_and_original_kept() {
        let service: MemoryRecordService = MemoryRecordService::new();
        service
            .create_record("proj", 7, "drop", "t", "first", HashMap::new())
            .await
            .unwrap();

        let result = service
            .create_record("proj", 7, "drop", "t", "second", HashMap::new())
            .await;
        assert!(matches!(result, Err(RecordError::AlreadyExists { .. })));

        let record: ArtifactRecord = service.get_record("proj", 7, "drop").await.unwrap();
        assert_eq!(record.data, "first");
    }

    #[tokio::test]
    async fn test_same_name_different_build_is_distinct() {
        let service: MemoryRecordService = MemoryRecordService::new();
        service
            .create_record("proj", 7, "drop", "t", "a", HashMap::new())
            .await
            .unwrap();
        service
            .create_record("proj", 8, "drop", "t", "b", HashMap::new())
            .await
            .unwrap();
        assert_eq!(service.record_count(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let service: MemoryRecordService = MemoryRecordService::new();
        let result = service.get_record("proj", 1, "nope").await;
        assert!(matches!(result, Err(RecordError::NotFound { .. })));
    }
}
