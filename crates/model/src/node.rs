//! File and directory tree nodes with canonical serialized descriptions.
//!
//! A node's identity is the `ContentId` of its canonical description. File
//! descriptions embed the ids of their chunks; tree descriptions embed the
//! ids of their children. A parent's id therefore depends on its children's
//! ids (Merkle property), and trees built this way are acyclic by
//! construction.
//!
//! Descriptions are canonical JSON: `serde_json::Map` keeps object keys
//! sorted, and children live in a `BTreeMap`, so identical trees encode to
//! byte-identical descriptions on every machine.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ManifestError;
use crate::hash::ContentId;

/// In-memory node: either file content or directory structure.
///
/// Produced by the chunker; consumed by the manifest builder, which assigns
/// ids bottom-up and serializes each node exactly once.
#[derive(Debug, Clone)]
pub enum Node {
    /// File content as an ordered sequence of chunk references.
    File(FileNode),
    /// Directory structure as a name-ordered mapping to child nodes.
    Tree(TreeNode),
}

/// File content: ordered chunk ids plus the file size.
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Chunk ids in file order. Concatenating the chunk payloads in this
    /// order reproduces the file bytes.
    pub chunks: Vec<ContentId>,
    /// File size in bytes.
    pub size: u64,
}

/// Directory structure: lexicographically ordered child nodes.
#[derive(Debug, Clone, Default)]
pub struct TreeNode {
    /// Children keyed by entry name. `BTreeMap` keeps the ordering stable.
    pub children: BTreeMap<String, Node>,
}

impl Node {
    /// Total size of all file content under this node, counting each file
    /// occurrence (shared content is not collapsed here).
    pub fn total_size(&self) -> u64 {
        match self {
            Node::File(f) => f.size,
            Node::Tree(t) => t.children.values().map(Node::total_size).sum(),
        }
    }

    /// Number of files under this node.
    pub fn file_count(&self) -> u64 {
        match self {
            Node::File(_) => 1,
            Node::Tree(t) => t.children.values().map(Node::file_count).sum(),
        }
    }
}

/// Encode a file node's canonical description from its chunk ids and size.
pub fn encode_file_node(chunks: &[ContentId], size: u64) -> String {
    let chunk_hashes: Vec<Value> = chunks.iter().map(|c| json!(c.hash())).collect();
    let description: Value = json!({
        "chunks": chunk_hashes,
        "kind": "file",
        "size": size,
    });
    description.to_string()
}

/// Encode a tree node's canonical description from its children's ids.
pub fn encode_tree_node(children: &BTreeMap<String, ContentId>) -> String {
    let child_map: BTreeMap<&str, Value> = children
        .iter()
        .map(|(name, id)| (name.as_str(), json!(id.hash())))
        .collect();
    let description: Value = json!({
        "children": child_map,
        "kind": "tree",
    });
    description.to_string()
}

/// Decoded node description, as reconstructed from proof nodes.
///
/// Hashes are plain digests; the algorithm is carried once at the manifest
/// level.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum NodeDescription {
    File {
        chunks: Vec<String>,
        size: u64,
    },
    Tree {
        children: BTreeMap<String, String>,
    },
}

/// Decode a canonical node description.
pub fn decode_node(id: &str, data: &str) -> Result<NodeDescription, ManifestError> {
    serde_json::from_str(data).map_err(|e| ManifestError::InvalidNodeDescription {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    fn id_of(bytes: &[u8]) -> ContentId {
        ContentId::of(bytes, HashAlgorithm::Xxh128)
    }

    #[test]
    fn test_file_encoding_is_canonical() {
        let chunks: Vec<ContentId> = vec![id_of(b"one"), id_of(b"two")];
        let a: String = encode_file_node(&chunks, 6);
        let b: String = encode_file_node(&chunks, 6);
        assert_eq!(a, b);
        // Keys come out sorted regardless of construction order.
        assert!(a.find("\"chunks\"").unwrap() < a.find("\"kind\"").unwrap());
        assert!(a.find("\"kind\"").unwrap() < a.find("\"size\"").unwrap());
    }

    #[test]
    fn test_tree_encoding_orders_children_by_name() {
        let mut children: BTreeMap<String, ContentId> = BTreeMap::new();
        children.insert("zebra".to_string(), id_of(b"z"));
        children.insert("apple".to_string(), id_of(b"a"));

        let encoded: String = encode_tree_node(&children);
        assert!(encoded.find("apple").unwrap() < encoded.find("zebra").unwrap());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let chunks: Vec<ContentId> = vec![id_of(b"payload")];
        let encoded: String = encode_file_node(&chunks, 7);

        let decoded: NodeDescription = decode_node("test", &encoded).unwrap();
        match decoded {
            NodeDescription::File { chunks: hashes, size } => {
                assert_eq!(hashes, vec![id_of(b"payload").hash().to_string()]);
                assert_eq!(size, 7);
            }
            NodeDescription::Tree { .. } => panic!("expected file description"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let result = decode_node("test", r#"{"kind":"symlink","target":"x"}"#);
        assert!(matches!(
            result,
            Err(ManifestError::InvalidNodeDescription { .. })
        ));
    }

    #[test]
    fn test_node_totals() {
        let mut children: BTreeMap<String, Node> = BTreeMap::new();
        children.insert(
            "a.txt".to_string(),
            Node::File(FileNode {
                chunks: vec![id_of(b"hello")],
                size: 5,
            }),
        );
        children.insert(
            "b.txt".to_string(),
            Node::File(FileNode {
                chunks: vec![id_of(b"hello")],
                size: 5,
            }),
        );
        let root: Node = Node::Tree(TreeNode { children });

        assert_eq!(root.total_size(), 10);
        assert_eq!(root.file_count(), 2);
    }
}
