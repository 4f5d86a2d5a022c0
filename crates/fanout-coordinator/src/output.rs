//! Durable output writing
//!
//! A [`DurableWriter`] tries its sinks in order until one reports success,
//! then checks that the destination exists with the expected length. A sink
//! that "succeeds" but leaves a short file counts as a failure and the next
//! sink is tried.
//!
//! When every sink fails, a destination the sinks created or rewrote is
//! removed; a previous file they never touched is left in place.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;

use fanout_core::{Chunk, FanoutError, FanoutResult};
use tracing::{debug, info, warn};

/// One way of getting ordered chunks onto disk.
///
/// `chunks` are already sorted by id and the destination directory exists.
pub trait OutputSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn write(&self, path: &Path, chunks: &[&Chunk]) -> FanoutResult<()>;
}

/// Temp file next to the destination, buffered write, fsync, rename.
///
/// Readers never observe a partially written destination.
#[derive(Debug, Default, Clone, Copy)]
pub struct AtomicFileSink;

impl OutputSink for AtomicFileSink {
    fn name(&self) -> &'static str {
        "atomic"
    }

    fn write(&self, path: &Path, chunks: &[&Chunk]) -> FanoutResult<()> {
        let dir = parent_dir(path);
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| FanoutError::io(dir, e))?;

        {
            let mut writer = BufWriter::new(tmp.as_file());
            for chunk in chunks.iter().filter(|c| !c.is_empty()) {
                writer
                    .write_all(&chunk.data)
                    .map_err(|e| FanoutError::io(tmp.path(), e))?;
            }
            writer.flush().map_err(|e| FanoutError::io(tmp.path(), e))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| FanoutError::io(tmp.path(), e))?;

        tmp.persist(path)
            .map_err(|e| FanoutError::io(path, e.error))?;
        Ok(())
    }
}

/// Plain `File` with one `write_all` per chunk, then fsync.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectFileSink;

impl OutputSink for DirectFileSink {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn write(&self, path: &Path, chunks: &[&Chunk]) -> FanoutResult<()> {
        let mut file = File::create(path).map_err(|e| FanoutError::io(path, e))?;
        for chunk in chunks.iter().filter(|c| !c.is_empty()) {
            file.write_all(&chunk.data)
                .map_err(|e| FanoutError::io(path, e))?;
        }
        file.sync_all().map_err(|e| FanoutError::io(path, e))
    }
}

/// Hands the chunks to the chunker's own reassembly routine.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReassembleSink;

impl OutputSink for ReassembleSink {
    fn name(&self) -> &'static str {
        "reassemble"
    }

    fn write(&self, path: &Path, chunks: &[&Chunk]) -> FanoutResult<()> {
        fanout_chunks::reassemble(chunks, path).map(|_| ())
    }
}

/// Ordered sink fallback plus mandatory post-write verification
pub struct DurableWriter {
    sinks: Vec<Box<dyn OutputSink>>,
}

impl Default for DurableWriter {
    fn default() -> Self {
        Self::new(vec![
            Box::new(AtomicFileSink),
            Box::new(DirectFileSink),
            Box::new(ReassembleSink),
        ])
    }
}

impl DurableWriter {
    pub fn new(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Write `chunks` to `path` in id order and return the byte count.
    ///
    /// Fails with the last sink's error once every sink has been tried, after
    /// removing whatever partial output the sinks left behind.
    pub fn write(&self, path: &Path, chunks: &[Chunk]) -> FanoutResult<u64> {
        if chunks.is_empty() {
            return Err(FanoutError::EmptyJob);
        }

        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.id);
        for chunk in ordered.iter().filter(|c| c.is_empty()) {
            warn!(chunk_id = chunk.id, "chunk is empty, skipping");
        }
        let expected: u64 = ordered.iter().map(|c| c.len() as u64).sum();

        let dir = parent_dir(path);
        std::fs::create_dir_all(dir).map_err(|e| FanoutError::io(dir, e))?;
        let before = FileStamp::of(path);

        let mut last_err = None;
        for sink in &self.sinks {
            let outcome = sink
                .write(path, &ordered)
                .and_then(|()| verify(path, expected));
            match outcome {
                Ok(()) => {
                    info!(
                        path = %path.display(),
                        bytes = expected,
                        chunks = ordered.len(),
                        sink = sink.name(),
                        "output written"
                    );
                    return Ok(expected);
                }
                Err(e) => {
                    warn!(sink = sink.name(), path = %path.display(), error = %e, "output sink failed");
                    last_err = Some(e);
                }
            }
        }

        let Some(err) = last_err else {
            return Err(FanoutError::Configuration(
                "durable writer has no output sinks".into(),
            ));
        };
        discard_partial(path, before);
        Err(err)
    }
}

impl std::fmt::Debug for DurableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableWriter")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Length and mtime of an existing file, used to tell whether a sink wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

fn discard_partial(path: &Path, before: Option<FileStamp>) {
    let Some(now) = FileStamp::of(path) else {
        return;
    };
    if before == Some(now) {
        debug!(path = %path.display(), "previous output untouched, keeping it");
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => warn!(path = %path.display(), "removed partial output"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial output"),
    }
}

fn verify(path: &Path, expected: u64) -> FanoutResult<()> {
    let actual = std::fs::metadata(path)
        .map_err(|e| FanoutError::io(path, e))?
        .len();
    if actual != expected {
        return Err(FanoutError::Integrity(format!(
            "{} holds {actual} bytes, expected {expected}",
            path.display()
        )));
    }
    debug!(path = %path.display(), bytes = actual, "output verified");
    Ok(())
}
