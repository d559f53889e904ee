//! Hash algorithm and content identifier definitions.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_128;

use crate::error::ManifestError;

/// Supported hashing algorithms for content addressing.
///
/// The algorithm travels with every identifier so that future algorithm
/// upgrades can coexist in the same store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "xxh128")]
    Xxh128,
}

impl HashAlgorithm {
    /// Get the string representation of the algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh128 => "xxh128",
        }
    }

    /// Get the file extension used in CAS storage keys.
    pub fn extension(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh128 => "xxh128",
        }
    }

    /// Compute the lowercase hex digest of a byte sequence.
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            HashAlgorithm::Xxh128 => format!("{:032x}", xxh3_128(bytes)),
        }
    }

    /// Parse an algorithm from its string representation.
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        match s {
            "xxh128" => Ok(HashAlgorithm::Xxh128),
            other => Err(ManifestError::UnsupportedHashAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed chunk size for file content (4MB = 4 * 1024 * 1024 bytes).
///
/// Fixed boundaries keep chunking deterministic: identical file bytes always
/// produce identical chunk sequences regardless of machine or run.
pub const CHUNK_SIZE_BYTES: u64 = 4 * 1024 * 1024;

/// Deterministic content identifier: a digest plus its algorithm tag.
///
/// Two byte sequences with equal bytes always produce equal `ContentId`s;
/// this is the dedup and addressing key for chunks, nodes, and manifests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentId {
    hash: String,
    algorithm: HashAlgorithm,
}

impl ContentId {
    /// Identify a byte sequence. Pure function of the bytes and algorithm.
    pub fn of(bytes: &[u8], algorithm: HashAlgorithm) -> Self {
        Self {
            hash: algorithm.digest(bytes),
            algorithm,
        }
    }

    /// Wrap an already-computed digest.
    pub fn from_hash(hash: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        Self {
            hash: hash.into(),
            algorithm,
        }
    }

    /// Parse the string form `{hash}.{algorithm}` produced by [`as_key`].
    ///
    /// [`as_key`]: ContentId::as_key
    pub fn parse(s: &str) -> Result<Self, ManifestError> {
        let (hash, alg) = s
            .rsplit_once('.')
            .ok_or_else(|| ManifestError::InvalidContentId(s.to_string()))?;
        if hash.is_empty() {
            return Err(ManifestError::InvalidContentId(s.to_string()));
        }
        Ok(Self {
            hash: hash.to_string(),
            algorithm: HashAlgorithm::parse(alg)?,
        })
    }

    /// The hex digest, without the algorithm tag.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// The algorithm that produced this identifier.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The storage key form: `{hash}.{algorithm}`.
    pub fn as_key(&self) -> String {
        format!("{}.{}", self.hash, self.algorithm.extension())
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_deterministic() {
        let a: String = HashAlgorithm::Xxh128.digest(b"hello");
        let b: String = HashAlgorithm::Xxh128.digest(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_digest_differs_for_different_bytes() {
        let a: String = HashAlgorithm::Xxh128.digest(b"hello");
        let b: String = HashAlgorithm::Xxh128.digest(b"hellp");
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_id_key_round_trip() {
        let id: ContentId = ContentId::of(b"content", HashAlgorithm::Xxh128);
        let key: String = id.as_key();
        assert!(key.ends_with(".xxh128"));

        let parsed: ContentId = ContentId::parse(&key).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_content_id_parse_rejects_malformed() {
        assert!(ContentId::parse("no-separator").is_err());
        assert!(ContentId::parse(".xxh128").is_err());
        assert!(ContentId::parse("abc123.md5").is_err());
    }
}
