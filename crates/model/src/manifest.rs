//! Manifest construction, encoding, and validated reconstruction.
//!
//! A manifest is the unit persisted remotely: the root node id plus every
//! node description needed to walk from the root down to individual chunk
//! ids without re-deriving anything from raw bytes.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ManifestError;
use crate::hash::{ContentId, HashAlgorithm};
use crate::node::{decode_node, encode_file_node, encode_tree_node, Node, NodeDescription};

/// A node's id together with its canonical serialized description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofNode {
    /// Digest of `data` (hash only; the algorithm is manifest-level).
    pub id: String,
    /// The node's canonical JSON description.
    pub data: String,
}

/// Root id plus the ordered proof nodes covering the whole tree.
///
/// Immutable once published. Rebuilding from the same input tree always
/// yields an identical manifest, which is what makes dedup and resumption
/// safe.
#[derive(Debug, Clone)]
pub struct Manifest {
    hash_alg: HashAlgorithm,
    root_id: ContentId,
    proof_nodes: Vec<ProofNode>,
    total_size: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawManifest {
    hash_alg: HashAlgorithm,
    nodes: Vec<ProofNode>,
    root_id: String,
    total_size: u64,
}

impl Manifest {
    /// The hash algorithm every id in this manifest was produced with.
    pub fn hash_alg(&self) -> HashAlgorithm {
        self.hash_alg
    }

    /// Id of the top tree node.
    pub fn root_id(&self) -> &ContentId {
        &self.root_id
    }

    /// Proof nodes in deterministic post-order (children before parents),
    /// duplicates collapsed.
    pub fn proof_nodes(&self) -> &[ProofNode] {
        &self.proof_nodes
    }

    /// Total size of all file content in the tree, counting each file.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Encode to canonical JSON.
    pub fn encode(&self) -> String {
        let nodes: Vec<Value> = self
            .proof_nodes
            .iter()
            .map(|n| json!({"data": n.data, "id": n.id}))
            .collect();
        let manifest: Value = json!({
            "hashAlg": self.hash_alg,
            "nodes": nodes,
            "rootId": self.root_id.hash(),
            "totalSize": self.total_size,
        });
        manifest.to_string()
    }

    /// Id of the manifest itself: the `ContentId` of its canonical encoding.
    pub fn id(&self) -> ContentId {
        ContentId::of(self.encode().as_bytes(), self.hash_alg)
    }

    /// Decode a manifest from its canonical JSON and validate its proof
    /// nodes.
    pub fn decode(json: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(json)?;
        Self::from_proof_nodes(
            ContentId::from_hash(raw.root_id, raw.hash_alg),
            raw.nodes,
        )
    }

    /// Reassemble a manifest from a stored root id and proof node list,
    /// re-validating every description against its claimed id.
    ///
    /// This is the common retrieve path: the record service hands back the
    /// proof nodes directly, so no extra store round trip is needed.
    pub fn from_proof_nodes(
        root_id: ContentId,
        proof_nodes: Vec<ProofNode>,
    ) -> Result<Self, ManifestError> {
        let mut manifest: Manifest = Manifest {
            hash_alg: root_id.algorithm(),
            root_id,
            proof_nodes,
            total_size: 0,
        };
        let index: NodeIndex = NodeIndex::from_manifest(&manifest)?;
        manifest.total_size = index.walk()?.total_size;
        Ok(manifest)
    }
}

/// Build a manifest from an in-memory node tree.
///
/// Single bottom-up pass: children's ids are computed before their parent's
/// description is serialized. Idempotent and deterministic.
pub fn build_manifest(root: &Node, algorithm: HashAlgorithm) -> Manifest {
    let mut seen: HashSet<String> = HashSet::new();
    let mut proof_nodes: Vec<ProofNode> = Vec::new();
    let root_id: ContentId = assign_ids(root, algorithm, &mut seen, &mut proof_nodes);

    Manifest {
        hash_alg: algorithm,
        root_id,
        proof_nodes,
        total_size: root.total_size(),
    }
}

/// Post-order id assignment. Emits each distinct node description once.
fn assign_ids(
    node: &Node,
    algorithm: HashAlgorithm,
    seen: &mut HashSet<String>,
    out: &mut Vec<ProofNode>,
) -> ContentId {
    let data: String = match node {
        Node::File(f) => encode_file_node(&f.chunks, f.size),
        Node::Tree(t) => {
            let child_ids: BTreeMap<String, ContentId> = t
                .children
                .iter()
                .map(|(name, child)| {
                    (name.clone(), assign_ids(child, algorithm, seen, out))
                })
                .collect();
            encode_tree_node(&child_ids)
        }
    };

    let id: ContentId = ContentId::of(data.as_bytes(), algorithm);
    if seen.insert(id.hash().to_string()) {
        out.push(ProofNode {
            id: id.hash().to_string(),
            data,
        });
    }
    id
}

/// A child name must be a single plain path component: non-empty, not a
/// dot entry, and free of separators on either platform.
fn is_valid_child_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\\')
}

/// A file to materialize, as derived from a validated manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the tree root, `/`-separated.
    pub path: String,
    /// Chunk ids in file order.
    pub chunks: Vec<ContentId>,
    /// File size in bytes.
    pub size: u64,
}

/// Flattened view of a manifest's tree: directories and files in
/// lexicographic depth-first order.
#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    /// Directory paths relative to the root, parents before children.
    /// Includes empty directories.
    pub dirs: Vec<String>,
    /// Files with their chunk sequences.
    pub files: Vec<FileEntry>,
    /// Sum of file sizes.
    pub total_size: u64,
}

/// Validated id-to-description map for reconstructing a tree.
///
/// Construction re-hashes every proof node against its claimed id and checks
/// that every referenced child resolves, so a `NodeIndex` can be walked
/// without further validation.
#[derive(Debug)]
pub struct NodeIndex {
    algorithm: HashAlgorithm,
    root: String,
    nodes: HashMap<String, NodeDescription>,
}

impl NodeIndex {
    /// Build and validate an index from a manifest's proof nodes.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self, ManifestError> {
        let algorithm: HashAlgorithm = manifest.hash_alg();
        let mut nodes: HashMap<String, NodeDescription> = HashMap::new();

        for proof in manifest.proof_nodes() {
            let actual: String = algorithm.digest(proof.data.as_bytes());
            if actual != proof.id {
                return Err(ManifestError::ProofNodeMismatch {
                    claimed: proof.id.clone(),
                    actual,
                });
            }
            nodes.insert(proof.id.clone(), decode_node(&proof.id, &proof.data)?);
        }

        let root: String = manifest.root_id().hash().to_string();
        if !nodes.contains_key(&root) {
            return Err(ManifestError::MissingRootNode { id: root });
        }

        for (id, description) in &nodes {
            if let NodeDescription::Tree { children } = description {
                for (name, child_id) in children {
                    // Digests only authenticate the description bytes; the
                    // names inside come from an untrusted record, so a name
                    // that could escape the target directory is rejected
                    // here, before anything is walked or written.
                    if !is_valid_child_name(name) {
                        return Err(ManifestError::InvalidChildName {
                            name: name.clone(),
                            id: id.clone(),
                        });
                    }
                    if !nodes.contains_key(child_id) {
                        return Err(ManifestError::MissingChildNode {
                            name: name.clone(),
                            id: child_id.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            algorithm,
            root,
            nodes,
        })
    }

    /// The manifest's hash algorithm.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Root node id (hash form).
    pub fn root_id(&self) -> &str {
        &self.root
    }

    /// Look up a node description by id.
    pub fn get(&self, id: &str) -> Option<&NodeDescription> {
        self.nodes.get(id)
    }

    /// Flatten the tree into directories and file entries.
    ///
    /// The root must be a tree node; a manifest of a single bare file is not
    /// produced by the chunker.
    pub fn walk(&self) -> Result<TreeListing, ManifestError> {
        let mut listing: TreeListing = TreeListing::default();
        self.walk_node(&self.root, "", &mut listing)?;
        Ok(listing)
    }

    fn walk_node(
        &self,
        id: &str,
        path: &str,
        listing: &mut TreeListing,
    ) -> Result<(), ManifestError> {
        // Children were validated at construction, so lookups cannot miss.
        let description: &NodeDescription =
            self.nodes
                .get(id)
                .ok_or_else(|| ManifestError::MissingChildNode {
                    name: path.to_string(),
                    id: id.to_string(),
                })?;

        match description {
            NodeDescription::File { chunks, size } => {
                listing.files.push(FileEntry {
                    path: path.to_string(),
                    chunks: chunks
                        .iter()
                        .map(|h| ContentId::from_hash(h.clone(), self.algorithm))
                        .collect(),
                    size: *size,
                });
                listing.total_size += size;
            }
            NodeDescription::Tree { children } => {
                if !path.is_empty() {
                    listing.dirs.push(path.to_string());
                }
                for (name, child_id) in children {
                    let child_path: String = if path.is_empty() {
                        name.clone()
                    } else {
                        format!("{}/{}", path, name)
                    };
                    self.walk_node(child_id, &child_path, listing)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FileNode, TreeNode};

    fn chunk_id(bytes: &[u8]) -> ContentId {
        ContentId::of(bytes, HashAlgorithm::Xxh128)
    }

    fn sample_tree() -> Node {
        let mut sub: TreeNode = TreeNode::default();
        sub.children.insert(
            "nested.bin".to_string(),
            Node::File(FileNode {
                chunks: vec![chunk_id(b"nested content")],
                size: 14,
            }),
        );

        let mut root: TreeNode = TreeNode::default();
        root.children.insert(
            "a.txt".to_string(),
            Node::File(FileNode {
                chunks: vec![chunk_id(b"hello")],
                size: 5,
            }),
        );
        root.children.insert(
            "b.txt".to_string(),
            Node::File(FileNode {
                chunks: vec![chunk_id(b"hello")],
                size: 5,
            }),
        );
        root.children
            .insert("sub".to_string(), Node::Tree(sub));
        Node::Tree(root)
    }

    #[test]
    fn test_build_is_deterministic() {
        let tree: Node = sample_tree();
        let a: Manifest = build_manifest(&tree, HashAlgorithm::Xxh128);
        let b: Manifest = build_manifest(&tree, HashAlgorithm::Xxh128);

        assert_eq!(a.root_id(), b.root_id());
        assert_eq!(a.proof_nodes(), b.proof_nodes());
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_identical_files_share_one_node() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);

        // a.txt and b.txt have identical content and size, so their file
        // node collapses to a single proof node: root, sub, shared file,
        // nested file.
        assert_eq!(manifest.proof_nodes().len(), 4);
        assert_eq!(manifest.total_size(), 24);
    }

    #[test]
    fn test_children_precede_parents() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);
        let root_pos: usize = manifest
            .proof_nodes()
            .iter()
            .position(|n| n.id == manifest.root_id().hash())
            .unwrap();
        assert_eq!(root_pos, manifest.proof_nodes().len() - 1);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);
        let decoded: Manifest = Manifest::decode(&manifest.encode()).unwrap();

        assert_eq!(decoded.root_id(), manifest.root_id());
        assert_eq!(decoded.proof_nodes(), manifest.proof_nodes());
        assert_eq!(decoded.total_size(), manifest.total_size());
        assert_eq!(decoded.id(), manifest.id());
    }

    #[test]
    fn test_index_walk_lists_all_entries() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);
        let index: NodeIndex = NodeIndex::from_manifest(&manifest).unwrap();
        let listing: TreeListing = index.walk().unwrap();

        let paths: Vec<&str> = listing.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "sub/nested.bin"]);
        assert_eq!(listing.dirs, vec!["sub".to_string()]);
        assert_eq!(listing.total_size, 24);
    }

    #[test]
    fn test_index_rejects_tampered_proof_node() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);
        let mut tampered: Vec<ProofNode> = manifest.proof_nodes().to_vec();
        tampered[0].data = tampered[0].data.replace("file", "eliF");

        let result = Manifest::from_proof_nodes(manifest.root_id().clone(), tampered);
        assert!(matches!(
            result,
            Err(ManifestError::ProofNodeMismatch { .. })
        ));
    }

    #[test]
    fn test_index_rejects_missing_child() {
        let manifest: Manifest = build_manifest(&sample_tree(), HashAlgorithm::Xxh128);
        // Drop the first proof node (a leaf, since children come first).
        let truncated: Vec<ProofNode> = manifest.proof_nodes()[1..].to_vec();

        let result = Manifest::from_proof_nodes(manifest.root_id().clone(), truncated);
        assert!(matches!(
            result,
            Err(ManifestError::MissingChildNode { .. })
        ));
    }

    /// Hand-assemble a manifest whose root tree has a single child with
    /// the given name, the way a record service would hand it back.
    fn manifest_with_child_name(name: &str) -> Result<Manifest, ManifestError> {
        let file_data: String = encode_file_node(&[chunk_id(b"x")], 1);
        let file_id: ContentId = ContentId::of(file_data.as_bytes(), HashAlgorithm::Xxh128);

        let mut children: BTreeMap<String, ContentId> = BTreeMap::new();
        children.insert(name.to_string(), file_id.clone());
        let tree_data: String = encode_tree_node(&children);
        let tree_id: ContentId = ContentId::of(tree_data.as_bytes(), HashAlgorithm::Xxh128);

        Manifest::from_proof_nodes(
            tree_id.clone(),
            vec![
                ProofNode {
                    id: file_id.hash().to_string(),
                    data: file_data,
                },
                ProofNode {
                    id: tree_id.hash().to_string(),
                    data: tree_data,
                },
            ],
        )
    }

    #[test]
    fn test_index_rejects_escaping_child_names() {
        for name in ["../evil.txt", "..", ".", "", "a/b", "a\\b", "/etc"] {
            assert!(
                matches!(
                    manifest_with_child_name(name),
                    Err(ManifestError::InvalidChildName { .. })
                ),
                "child name {name:?} must be rejected"
            );
        }
    }

    #[test]
    fn test_index_accepts_plain_child_names() {
        assert!(manifest_with_child_name("normal.txt").is_ok());
        assert!(manifest_with_child_name("..twodots").is_ok());
    }

    #[test]
    fn test_empty_directory_is_preserved() {
        let mut root: TreeNode = TreeNode::default();
        root.children
            .insert("empty".to_string(), Node::Tree(TreeNode::default()));
        let manifest: Manifest =
            build_manifest(&Node::Tree(root), HashAlgorithm::Xxh128);

        let index: NodeIndex = NodeIndex::from_manifest(&manifest).unwrap();
        let listing: TreeListing = index.walk().unwrap();
        assert_eq!(listing.dirs, vec!["empty".to_string()]);
        assert!(listing.files.is_empty());
    }
}
