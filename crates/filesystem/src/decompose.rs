//! Directory tree decomposition into content-addressed nodes.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::debug;

use pipeline_artifact_model::{ContentId, FileNode, HashAlgorithm, Node, TreeNode};

use crate::chunk::chunk_boundaries;
use crate::error::FileSystemError;

/// Local byte range backing a chunk, for later upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSource {
    /// Absolute path of the file containing the chunk.
    pub path: PathBuf,
    /// Start offset within the file.
    pub offset: u64,
    /// Chunk length in bytes.
    pub length: u64,
}

/// Result of decomposing a directory tree.
#[derive(Debug)]
pub struct DecomposedTree {
    /// Root tree node, ready for manifest construction.
    pub root: Node,
    /// One source per distinct chunk id (hash form). Identical content
    /// anywhere in the tree collapses to a single entry.
    pub chunk_sources: HashMap<String, ChunkSource>,
    /// Number of files decomposed.
    pub file_count: u64,
    /// Total bytes across all files, counting each file.
    pub total_size: u64,
}

/// Decompose a directory tree into a content-addressed node tree.
///
/// Walks the tree in stable lexicographic order by entry name, recursively,
/// so two processes decomposing an identical tree produce identical node
/// structures and therefore identical ids. Each file splits into
/// deterministic fixed-size chunks, hashed as they are read.
///
/// # Arguments
/// * `root` - Directory to decompose (must exist and be a directory)
/// * `algorithm` - Hash algorithm for chunk and node ids
///
/// # Errors
/// - `FileSystemError::PathNotFound` if the root doesn't exist
/// - `FileSystemError::NotADirectory` if the root is not a directory
/// - `FileSystemError::Io` if any file is unreadable
pub fn decompose(
    root: &Path,
    algorithm: HashAlgorithm,
) -> Result<DecomposedTree, FileSystemError> {
    if !root.exists() {
        return Err(FileSystemError::PathNotFound {
            path: root.display().to_string(),
        });
    }
    if !root.is_dir() {
        return Err(FileSystemError::NotADirectory {
            path: root.display().to_string(),
        });
    }

    let mut chunk_sources: HashMap<String, ChunkSource> = HashMap::new();
    let mut file_count: u64 = 0;
    let mut total_size: u64 = 0;
    let tree: TreeNode = decompose_dir(
        root,
        algorithm,
        &mut chunk_sources,
        &mut file_count,
        &mut total_size,
    )?;

    debug!(
        files = file_count,
        bytes = total_size,
        distinct_chunks = chunk_sources.len(),
        root = %root.display(),
        "decomposed directory tree"
    );

    Ok(DecomposedTree {
        root: Node::Tree(tree),
        chunk_sources,
        file_count,
        total_size,
    })
}

fn decompose_dir(
    dir: &Path,
    algorithm: HashAlgorithm,
    chunk_sources: &mut HashMap<String, ChunkSource>,
    file_count: &mut u64,
    total_size: &mut u64,
) -> Result<TreeNode, FileSystemError> {
    let mut entries: Vec<(String, PathBuf, std::fs::FileType)> = Vec::new();
    let read_dir = std::fs::read_dir(dir).map_err(|e| FileSystemError::io(dir, e))?;
    for entry in read_dir {
        let entry: std::fs::DirEntry = entry.map_err(|e| FileSystemError::io(dir, e))?;
        let path: PathBuf = entry.path();
        let name: String = entry
            .file_name()
            .into_string()
            .map_err(|_| FileSystemError::NonUnicodeName {
                path: path.display().to_string(),
            })?;
        let file_type: std::fs::FileType =
            entry.file_type().map_err(|e| FileSystemError::io(&path, e))?;
        entries.push((name, path, file_type));
    }

    // Lexicographic by name; required for deterministic node ids.
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut children: BTreeMap<String, Node> = BTreeMap::new();
    for (name, path, file_type) in entries {
        let node: Node = if file_type.is_dir() {
            Node::Tree(decompose_dir(
                &path,
                algorithm,
                chunk_sources,
                file_count,
                total_size,
            )?)
        } else if file_type.is_file() {
            let file_node: FileNode = decompose_file(&path, algorithm, chunk_sources)?;
            *file_count += 1;
            *total_size += file_node.size;
            Node::File(file_node)
        } else {
            return Err(FileSystemError::UnsupportedEntry {
                path: path.display().to_string(),
            });
        };
        children.insert(name, node);
    }

    Ok(TreeNode { children })
}

/// Split one file into chunks, hashing each as it is read.
fn decompose_file(
    path: &Path,
    algorithm: HashAlgorithm,
    chunk_sources: &mut HashMap<String, ChunkSource>,
) -> Result<FileNode, FileSystemError> {
    let mut file: File = File::open(path).map_err(|e| FileSystemError::io(path, e))?;
    let size: u64 = file
        .metadata()
        .map_err(|e| FileSystemError::io(path, e))?
        .len();

    let mut chunks: Vec<ContentId> = Vec::new();
    for (offset, length) in chunk_boundaries(size) {
        let mut buffer: Vec<u8> = vec![0u8; length as usize];
        file.read_exact(&mut buffer)
            .map_err(|e| FileSystemError::io(path, e))?;

        let id: ContentId = ContentId::of(&buffer, algorithm);
        chunk_sources
            .entry(id.hash().to_string())
            .or_insert_with(|| ChunkSource {
                path: path.to_path_buf(),
                offset,
                length,
            });
        chunks.push(id);
    }

    Ok(FileNode { chunks, size })
}
