//! File system error types.

use thiserror::Error;

/// Errors that can occur during local file system operations.
///
/// These indicate a violated local precondition (a missing or unreadable
/// path), not a transient condition, so callers must not retry them.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// Path not found.
    #[error("Path not found: {path}")]
    PathNotFound {
        /// The path that was not found.
        path: String,
    },

    /// Expected a directory but found something else.
    #[error("Not a directory: {path}")]
    NotADirectory {
        /// The offending path.
        path: String,
    },

    /// Entry name is not valid Unicode and cannot appear in a manifest.
    #[error("Entry name is not valid Unicode: {path}")]
    NonUnicodeName {
        /// The offending path.
        path: String,
    },

    /// Entry is neither a regular file nor a directory.
    #[error("Unsupported entry type: {path}")]
    UnsupportedEntry {
        /// The offending path.
        path: String,
    },

    /// Underlying I/O failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being read when the error occurred.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl FileSystemError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        FileSystemError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
