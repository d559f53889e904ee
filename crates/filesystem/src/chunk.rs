//! Deterministic fixed-size chunk boundaries.
//!
//! Boundaries depend only on file size, so identical file bytes always split
//! into identical chunk sequences, on any machine.

use pipeline_artifact_model::CHUNK_SIZE_BYTES;

/// Whether a file of the given size splits into more than one chunk.
pub fn needs_chunking(size: u64) -> bool {
    size > CHUNK_SIZE_BYTES
}

/// Number of chunks a file of the given size splits into.
///
/// Empty files have no chunks.
pub fn expected_chunk_count(size: u64) -> usize {
    if size == 0 {
        return 0;
    }
    (size.div_ceil(CHUNK_SIZE_BYTES)) as usize
}

/// The (offset, length) byte ranges for a file of the given size.
pub fn chunk_boundaries(size: u64) -> Vec<(u64, u64)> {
    let mut boundaries: Vec<(u64, u64)> = Vec::with_capacity(expected_chunk_count(size));
    let mut offset: u64 = 0;
    while offset < size {
        let length: u64 = CHUNK_SIZE_BYTES.min(size - offset);
        boundaries.push((offset, length));
        offset += length;
    }
    boundaries
}
