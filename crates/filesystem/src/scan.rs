//! Pre-decomposition scan for progress reporting.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::FileSystemError;

/// File and byte totals for a directory tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Number of regular files.
    pub file_count: u64,
    /// Sum of file sizes in bytes.
    pub total_size: u64,
}

/// Walk a directory tree and total its regular files.
///
/// Used before decomposition so progress logs can state up front how much
/// work a publish involves. Does not hash anything.
///
/// # Errors
/// - `FileSystemError::PathNotFound` if the root doesn't exist
/// - `FileSystemError::Io` if the walk fails partway
pub fn scan_tree(root: &Path) -> Result<ScanSummary, FileSystemError> {
    if !root.exists() {
        return Err(FileSystemError::PathNotFound {
            path: root.display().to_string(),
        });
    }

    let mut summary: ScanSummary = ScanSummary::default();
    for entry in WalkDir::new(root) {
        let entry: walkdir::DirEntry = entry.map_err(|e| FileSystemError::Io {
            path: e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string()),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk failed")),
        })?;
        if entry.file_type().is_file() {
            let size: u64 = entry
                .metadata()
                .map(|m| m.len())
                .map_err(|e| FileSystemError::Io {
                    path: entry.path().display().to_string(),
                    source: e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("metadata failed")),
                })?;
            summary.file_count += 1;
            summary.total_size += size;
        }
    }
    Ok(summary)
}
