//! Ordered reassembly of chunks into a file

use std::borrow::Borrow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use fanout_core::{Chunk, FanoutError, FanoutResult};

/// Write `chunks` to `output` in ascending id order, replacing any existing
/// file and creating parent directories.
///
/// Chunks may arrive in any order. Empty chunks are skipped with a warning.
/// An empty chunk list is an error rather than an empty file.
///
/// Returns the number of bytes written.
pub fn reassemble<C: Borrow<Chunk>>(chunks: &[C], output: &Path) -> FanoutResult<u64> {
    if chunks.is_empty() {
        return Err(FanoutError::EmptyJob);
    }

    let mut ordered: Vec<&Chunk> = chunks.iter().map(Borrow::<Chunk>::borrow).collect();
    ordered.sort_by_key(|c| c.id);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| FanoutError::io(parent, e))?;
    }

    let file = File::create(output).map_err(|e| FanoutError::io(output, e))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;

    for chunk in ordered {
        if chunk.is_empty() {
            tracing::warn!(chunk_id = chunk.id, "chunk is empty, skipping");
            continue;
        }
        writer
            .write_all(&chunk.data)
            .map_err(|e| FanoutError::io(output, e))?;
        written += chunk.len() as u64;
    }

    writer.flush().map_err(|e| FanoutError::io(output, e))?;

    tracing::debug!(path = %output.display(), bytes = written, "chunks reassembled");
    Ok(written)
}
