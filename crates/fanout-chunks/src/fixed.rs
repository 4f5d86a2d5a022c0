//! Fixed-size chunking
//!
//! Reads a file sequentially in `chunk_size` blocks and tags each block with
//! a contiguous id starting at 0. Only the last chunk may be shorter.
//! An empty file yields no chunks.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use fanout_core::{Chunk, FanoutError, FanoutResult};

/// AES block size, used by the legacy size adjustment
const CIPHER_BLOCK: usize = 16;

/// Chunk size actually used for splitting.
///
/// With `legacy_block_adjust`, a block-aligned size larger than one block is
/// shrunk by one block, matching files produced by the older layout. Encrypt
/// and decrypt runs of the same file must agree on this flag.
pub fn effective_chunk_size(chunk_size: usize, legacy_block_adjust: bool) -> usize {
    if legacy_block_adjust && chunk_size > CIPHER_BLOCK && chunk_size % CIPHER_BLOCK == 0 {
        chunk_size - CIPHER_BLOCK
    } else {
        chunk_size
    }
}

fn check_size(chunk_size: usize) -> FanoutResult<()> {
    if chunk_size == 0 {
        return Err(FanoutError::InvalidArgument(
            "chunk size must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn next_id(count: usize) -> FanoutResult<u32> {
    u32::try_from(count)
        .ok()
        .filter(|id| i32::try_from(*id).is_ok())
        .ok_or_else(|| FanoutError::InvalidArgument(format!("too many chunks: {count}")))
}

/// Split the file at `path` into chunks of `chunk_size` bytes.
pub fn split(path: &Path, chunk_size: usize) -> FanoutResult<Vec<Chunk>> {
    check_size(chunk_size)?;

    let file = File::open(path).map_err(|e| FanoutError::io(path, e))?;
    let file_len = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::new(file);

    let expected_chunks = usize::try_from(file_len).unwrap_or(0).div_ceil(chunk_size);
    let mut chunks = Vec::with_capacity(expected_chunks);
    let mut consumed = 0u64;
    loop {
        // Reserve no more than the file still holds; read_to_end grows the
        // buffer if the file got longer since it was opened
        let remaining = usize::try_from(file_len.saturating_sub(consumed)).unwrap_or(usize::MAX);
        let mut buf = Vec::with_capacity(chunk_size.min(remaining));
        let n = (&mut reader)
            .take(chunk_size as u64)
            .read_to_end(&mut buf)
            .map_err(|e| FanoutError::io(path, e))?;
        if n == 0 {
            break;
        }
        consumed += n as u64;
        chunks.push(Chunk::new(next_id(chunks.len())?, buf));
    }

    tracing::debug!(
        path = %path.display(),
        bytes = file_len,
        chunk_size,
        chunks = chunks.len(),
        "file split"
    );
    Ok(chunks)
}

/// Split an in-memory buffer the same way [`split`] splits a file.
pub fn split_bytes(data: &[u8], chunk_size: usize) -> FanoutResult<Vec<Chunk>> {
    check_size(chunk_size)?;
    data.chunks(chunk_size)
        .enumerate()
        .map(|(i, block)| Ok(Chunk::new(next_id(i)?, block.to_vec())))
        .collect()
}
