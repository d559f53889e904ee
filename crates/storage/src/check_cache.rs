//! Process-local cache of ids known to exist in the remote store.
//!
//! Content is immutable once stored, so a positive existence answer never
//! goes stale. Negative answers are never cached.

use std::sync::Arc;

use dashmap::DashSet;

/// Shared set of store keys known to be present remotely.
///
/// Consulted before existence checks and updated after successful uploads
/// and positive checks, so repeated publishes of overlapping content skip
/// the network round trip entirely.
#[derive(Debug, Clone, Default)]
pub struct PresenceCache {
    known: Arc<DashSet<String>>,
}

impl PresenceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this key is known to exist remotely.
    pub fn contains(&self, key: &str) -> bool {
        self.known.contains(key)
    }

    /// Record that this key exists remotely.
    pub fn mark_present(&self, key: impl Into<String>) {
        self.known.insert(key.into());
    }

    /// Number of known keys.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}
