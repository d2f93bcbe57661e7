//! Channels over a directory of chunk files.
//!
//! Every `write` publishes one chunk: the bytes go to `.chunk_<n>.tmp`,
//! which is then renamed to `.chunk_<n>`, so a reader never sees a partial
//! chunk. The reader consumes chunks in index order and deletes each one as
//! soon as its last byte has been read, which bounds disk usage by what the
//! reader has not caught up with yet. Gaps in the numbering are skipped.
//!
//! `.closed` inside the directory marks that one side has closed.

use crate::{
    Channel, ChannelState, Lifecycle, ReadOutcome, ReadableChannel, WritableChannel,
    create_marker, remove_file_if_exists,
};
use dirpipe_core::{Error, Result};
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

/// File name prefix of a published chunk.
pub const CHUNK_PREFIX: &str = ".chunk_";

/// Suffix of a chunk that is still being written.
pub const TMP_SUFFIX: &str = ".tmp";

/// Close marker inside a chunk directory.
pub const CLOSED_MARKER: &str = ".closed";

fn chunk_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{CHUNK_PREFIX}{index}"))
}

fn chunk_index(name: &str) -> Option<u64> {
    name.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

/// Indices of all published chunks in `dir`.
fn published_chunks(dir: &Path) -> Result<impl Iterator<Item = u64>> {
    let entries = fs::read_dir(dir)?;
    Ok(entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(chunk_index)))
}

fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Directory and close state shared by both chunk channel ends.
#[derive(Debug)]
struct ChunkDir {
    dir: PathBuf,
    marker: PathBuf,
    lifecycle: Lifecycle,
}

impl ChunkDir {
    fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            marker: dir.join(CLOSED_MARKER),
            lifecycle: Lifecycle::default(),
        })
    }

    fn peer_closed(&self) -> bool {
        self.marker.exists()
    }

    fn state(&self) -> ChannelState {
        self.lifecycle.state(|| self.peer_closed())
    }

    fn close(&mut self) -> Result<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        self.lifecycle.mark_closed();

        let first = create_marker(&self.marker)?;
        if !first && self.lifecycle.cleanup_on_close() {
            tracing::debug!(
                dir = %self.dir.display(),
                "both ends closed, removing chunk directory"
            );
            remove_dir_if_exists(&self.dir)?;
        }
        Ok(())
    }
}

/// Writing end of a chunk-file channel.
#[derive(Debug)]
pub struct ChunkWriter {
    dir: ChunkDir,
    next_index: u64,
}

impl ChunkWriter {
    /// Opens a chunk directory for writing, creating it if needed.
    ///
    /// Numbering continues after the highest chunk already present.
    ///
    /// # Errors
    /// Returns IO error if the directory cannot be created or listed.
    pub fn open(dir: &Path) -> Result<Self> {
        let dir = ChunkDir::open(dir)?;
        let next_index = published_chunks(&dir.dir)?
            .max()
            .map_or(0, |index| index + 1);
        Ok(Self { dir, next_index })
    }

    /// Returns the chunk directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir.dir
    }

    /// Index the next chunk will be published under.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next_index
    }
}

impl Channel for ChunkWriter {
    fn state(&self) -> ChannelState {
        self.dir.state()
    }

    fn close(&mut self) -> Result<()> {
        self.dir.close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.dir.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl WritableChannel for ChunkWriter {
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.dir.lifecycle.ensure_open()?;
        if self.dir.peer_closed() {
            return Err(Error::ChannelClosed);
        }
        if src.is_empty() {
            return Ok(0);
        }

        let index = self.next_index;
        let target = chunk_path(&self.dir.dir, index);
        let tmp = self.dir.dir.join(format!("{CHUNK_PREFIX}{index}{TMP_SUFFIX}"));
        fs::write(&tmp, src)?;
        fs::rename(&tmp, &target)?;
        self.next_index += 1;

        tracing::trace!(index, len = src.len(), "published chunk");
        Ok(src.len())
    }
}

/// Chunk currently being consumed.
#[derive(Debug)]
struct OpenChunk {
    index: u64,
    path: PathBuf,
    file: File,
    remaining: u64,
}

/// Reading end of a chunk-file channel.
#[derive(Debug)]
pub struct ChunkReader {
    dir: ChunkDir,
    cursor: u64,
    current: Option<OpenChunk>,
}

impl ChunkReader {
    /// Opens a chunk directory for reading, creating it if needed.
    ///
    /// # Errors
    /// Returns IO error if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            dir: ChunkDir::open(dir)?,
            cursor: 0,
            current: None,
        })
    }

    /// Returns the chunk directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.dir.dir
    }

    /// Lowest chunk index not yet fully consumed.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Opens the lowest published chunk at or after the cursor.
    fn next_chunk(&self) -> Result<Option<OpenChunk>> {
        let expected = chunk_path(&self.dir.dir, self.cursor);
        let index = if expected.exists() {
            Some(self.cursor)
        } else {
            published_chunks(&self.dir.dir)?
                .filter(|index| *index >= self.cursor)
                .min()
        };
        let Some(index) = index else {
            return Ok(None);
        };

        let path = chunk_path(&self.dir.dir, index);
        let file = File::open(&path)?;
        let remaining = file.metadata()?.len();
        Ok(Some(OpenChunk {
            index,
            path,
            file,
            remaining,
        }))
    }

    /// Deletes the current chunk and moves the cursor past it.
    fn finish_current(&mut self) -> Result<()> {
        if let Some(chunk) = self.current.take() {
            drop(chunk.file);
            remove_file_if_exists(&chunk.path)?;
            self.cursor = chunk.index + 1;
            tracing::trace!(index = chunk.index, "consumed chunk");
        }
        Ok(())
    }

    /// Fills `dst` from as many chunks as are available.
    fn fill(&mut self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.current.is_none() {
                self.current = self.next_chunk()?;
            }
            let Some(chunk) = self.current.as_mut() else {
                break;
            };

            let want = (dst.len() - filled).min(chunk.remaining.min(usize::MAX as u64) as usize);
            let n = if want == 0 {
                0
            } else {
                chunk.file.read(&mut dst[filled..filled + want])?
            };
            filled += n;
            chunk.remaining -= n as u64;

            // A short read on a published chunk means it is exhausted.
            if n == 0 || chunk.remaining == 0 {
                self.finish_current()?;
            }
        }
        Ok(filled)
    }
}

impl Channel for ChunkReader {
    fn state(&self) -> ChannelState {
        self.dir.state()
    }

    fn close(&mut self) -> Result<()> {
        self.current = None;
        self.dir.close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.dir.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl ReadableChannel for ChunkReader {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        self.dir.lifecycle.ensure_open()?;
        if dst.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let n = self.fill(dst)?;
        if n > 0 {
            return Ok(ReadOutcome::Data(n));
        }
        if !self.dir.peer_closed() {
            return Ok(ReadOutcome::Pending);
        }

        // Chunks published right before the marker appeared.
        match self.fill(dst)? {
            0 => Ok(ReadOutcome::Eof),
            n => Ok(ReadOutcome::Data(n)),
        }
    }
}
