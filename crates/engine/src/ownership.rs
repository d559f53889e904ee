//! Working-directory ownership marker.
//!
//! An agent installation claims a working directory by writing a marker
//! file at its root. A second installation pointed at the same directory
//! sees the foreign marker and refuses to proceed instead of silently
//! corrupting the first installation's state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Marker file name written at the root of an owned directory.
pub const OWNERSHIP_FILE_NAME: &str = ".ownership";

/// Identity of the installation that owns a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipInfo {
    /// Server the owning agent is registered against.
    pub server_url: String,
    /// Pool the owning agent belongs to.
    pub pool_name: String,
    /// Name of the owning agent.
    pub agent_name: String,
    /// Install path of the owning agent.
    pub agent_path: String,
}

/// Errors from ownership operations.
#[derive(Debug, Error)]
pub enum OwnershipError {
    /// The directory to claim or verify doesn't exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: String },

    /// The directory is claimed by a different installation.
    #[error("Directory {path} is owned by agent '{owner}' at {owner_path}")]
    OwnedByOther {
        path: String,
        owner: String,
        owner_path: String,
    },

    /// Marker file could not be read or written.
    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    /// Marker file exists but its contents are unparseable.
    #[error("Ownership marker at {path} is malformed: {message}")]
    Malformed { path: String, message: String },
}

/// Claims, verifies, and releases directory ownership for one installation.
#[derive(Debug, Clone)]
pub struct DirectoryOwnership {
    info: OwnershipInfo,
}

impl DirectoryOwnership {
    /// Create a tracker for this installation's identity.
    pub fn new(info: OwnershipInfo) -> Self {
        Self { info }
    }

    /// Claim a directory, overwriting any existing marker.
    ///
    /// Registration is deliberately forceful: an operator re-pointing an
    /// agent at a directory takes ownership regardless of a stale marker.
    ///
    /// # Errors
    /// - `OwnershipError::DirectoryNotFound` if the directory doesn't exist
    /// - `OwnershipError::Io` if the marker can't be written
    pub fn register(&self, directory: &Path) -> Result<(), OwnershipError> {
        if !directory.is_dir() {
            return Err(OwnershipError::DirectoryNotFound {
                path: directory.display().to_string(),
            });
        }

        let marker: PathBuf = directory.join(OWNERSHIP_FILE_NAME);
        let payload: String = match serde_json::to_string_pretty(&self.info) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(OwnershipError::Io {
                    path: marker.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let io_err = |e: std::io::Error| OwnershipError::Io {
            path: marker.display().to_string(),
            message: e.to_string(),
        };
        let mut file: fs::File = fs::File::create(&marker).map_err(io_err)?;
        file.write_all(payload.as_bytes()).map_err(io_err)?;

        info!(
            directory = %directory.display(),
            agent = %self.info.agent_name,
            "registered directory ownership"
        );
        Ok(())
    }

    /// Whether this installation owns the directory.
    ///
    /// A missing marker means unowned, not owned-by-other.
    pub fn is_owned(&self, directory: &Path) -> Result<bool, OwnershipError> {
        match read_marker(directory)? {
            Some(owner) => Ok(owner == self.info),
            None => Ok(false),
        }
    }

    /// Verify the directory is either unclaimed or claimed by this
    /// installation.
    ///
    /// # Errors
    /// `OwnershipError::OwnedByOther` naming the conflicting installation.
    pub fn ensure_owned(&self, directory: &Path) -> Result<(), OwnershipError> {
        match read_marker(directory)? {
            Some(owner) if owner != self.info => Err(OwnershipError::OwnedByOther {
                path: directory.display().to_string(),
                owner: owner.agent_name,
                owner_path: owner.agent_path,
            }),
            _ => Ok(()),
        }
    }

    /// Remove the marker if this installation owns it.
    ///
    /// Best-effort: a marker belonging to another installation is left in
    /// place, and a failure to delete is logged rather than surfaced.
    pub fn release(&self, directory: &Path) {
        let owned: bool = match self.is_owned(directory) {
            Ok(owned) => owned,
            Err(e) => {
                warn!(
                    directory = %directory.display(),
                    error = %e,
                    "could not verify ownership during release"
                );
                return;
            }
        };
        if !owned {
            return;
        }

        let marker: PathBuf = directory.join(OWNERSHIP_FILE_NAME);
        if let Err(e) = fs::remove_file(&marker) {
            warn!(
                marker = %marker.display(),
                error = %e,
                "could not remove ownership marker"
            );
        } else {
            info!(
                directory = %directory.display(),
                "released directory ownership"
            );
        }
    }
}

fn read_marker(directory: &Path) -> Result<Option<OwnershipInfo>, OwnershipError> {
    let marker: PathBuf = directory.join(OWNERSHIP_FILE_NAME);
    let contents: String = match fs::read_to_string(&marker) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(OwnershipError::Io {
                path: marker.display().to_string(),
                message: e.to_string(),
            })
        }
    };
    let info: OwnershipInfo =
        serde_json::from_str(&contents).map_err(|e| OwnershipError::Malformed {
            path: marker.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(Some(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn info(agent: &str) -> OwnershipInfo {
        OwnershipInfo {
            server_url: "https://ci.example.test".to_string(),
            pool_name: "default".to_string(),
            agent_name: agent.to_string(),
            agent_path: format!("/opt/agents/{agent}"),
        }
    }

    #[test]
    fn test_register_then_owned() {
        let dir: TempDir = TempDir::new().unwrap();
        let ownership: DirectoryOwnership = DirectoryOwnership::new(info("agent-1"));

        ownership.register(dir.path()).unwrap();
        assert!(dir.path().join(OWNERSHIP_FILE_NAME).exists());
        assert!(ownership.is_owned(dir.path()).unwrap());
        assert!(ownership.ensure_owned(dir.path()).is_ok());
    }

    #[test]
    fn test_unmarked_directory_is_unowned_but_usable() {
        let dir: TempDir = TempDir::new().unwrap();
        let ownership: DirectoryOwnership = DirectoryOwnership::new(info("agent-1"));

        assert!(!ownership.is_owned(dir.path()).unwrap());
        assert!(ownership.ensure_owned(dir.path()).is_ok());
    }

    #[test]
    fn test_foreign_marker_is_rejected() {
        let dir: TempDir = TempDir::new().unwrap();
        DirectoryOwnership::new(info("agent-1"))
            .register(dir.path())
            .unwrap();

        let other: DirectoryOwnership = DirectoryOwnership::new(info("agent-2"));
        assert!(!other.is_owned(dir.path()).unwrap());
        match other.ensure_owned(dir.path()) {
            Err(OwnershipError::OwnedByOther { owner, .. }) => assert_eq!(owner, "agent-1"),
            other => panic!("expected OwnedByOther, got {other:?}"),
        }
    }

    #[test]
    fn test_register_overwrites_foreign_marker() {
        let dir: TempDir = TempDir::new().unwrap();
        DirectoryOwnership::new(info("agent-1"))
            .register(dir.path())
            .unwrap();

        let takeover: DirectoryOwnership = DirectoryOwnership::new(info("agent-2"));
        takeover.register(dir.path()).unwrap();
        assert!(takeover.is_owned(dir.path()).unwrap());
    }

    #[test]
    fn test_release_removes_own_marker_only() {
        let dir: TempDir = TempDir::new().unwrap();
        let owner: DirectoryOwnership = DirectoryOwnership::new(info("agent-1"));
        owner.register(dir.path()).unwrap();

        // A different installation releasing is a no-op.
        DirectoryOwnership::new(info("agent-2")).release(dir.path());
        assert!(dir.path().join(OWNERSHIP_FILE_NAME).exists());

        owner.release(dir.path());
        assert!(!dir.path().join(OWNERSHIP_FILE_NAME).exists());
    }

    #[test]
    fn test_register_missing_directory() {
        let dir: TempDir = TempDir::new().unwrap();
        let ownership: DirectoryOwnership = DirectoryOwnership::new(info("agent-1"));
        assert!(matches!(
            ownership.register(&dir.path().join("missing")),
            Err(OwnershipError::DirectoryNotFound { .. })
        ));
    }

    #[test]
    fn test_malformed_marker_is_reported() {
        let dir: TempDir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(OWNERSHIP_FILE_NAME), b"not json").unwrap();

        let ownership: DirectoryOwnership = DirectoryOwnership::new(info("agent-1"));
        assert!(matches!(
            ownership.is_owned(dir.path()),
            Err(OwnershipError::Malformed { .. })
        ));
    }
}
