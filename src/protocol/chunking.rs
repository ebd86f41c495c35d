//! Upload chunk sizing and splitting.

use crate::config::ChunkConfig;

/// Number of chunks a payload of `len` bytes splits into at `chunk_size`
///
/// An empty payload has zero chunks.
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    let chunk_size = chunk_size.max(1);
    len.div_ceil(chunk_size)
}

/// Split `payload` into upload chunks, in payload order
///
/// The last chunk may be shorter. Chunk boundaries mean nothing to the remote
/// side; it reassembles by the byte count declared in the session URL.
pub fn split(payload: &[u8], chunk_size: usize) -> std::slice::Chunks<'_, u8> {
    payload.chunks(chunk_size.max(1))
}

/// Pick the chunk size for a batch from the input sizes
///
/// `average / target_chunks_per_file`, clamped to `[min_bytes, max_bytes]`.
/// Falls back to `default_bytes` (also clamped) when there are no inputs.
pub fn choose_chunk_size(sizes: &[usize], config: &ChunkConfig) -> usize {
    let min = config.min_bytes.max(1);
    let max = config.max_bytes.max(min);

    if sizes.is_empty() {
        return config.default_bytes.clamp(min, max);
    }

    let total: u128 = sizes.iter().map(|&s| s as u128).sum();
    let average = (total / sizes.len() as u128) as usize;
    let target = config.target_chunks_per_file.max(1);
    (average / target).clamp(min, max)
}
