//! Pipes over chunk-file directories.
//!
//! Layout: `<dir>/yinToYang/` and `<dir>/yangToYin/`, each a chunk
//! directory removed by the second of its two closers.

use super::remove_dir_all_if_exists;
use crate::kind::PipeType;
use crate::pipe::{Pipe, PipeBackend};
use dirpipe_channel::{ChunkReader, ChunkWriter};
use dirpipe_core::{Result, Role};
use std::fs;
use std::path::{Path, PathBuf};

/// Pipe over chunk files.
pub type ChunkFilePipe = Pipe<ChunkFileBackend>;

/// Backend keeping each channel as a subdirectory of chunk files.
#[derive(Debug)]
pub struct ChunkFileBackend {
    directory: PathBuf,
}

impl ChunkFileBackend {
    /// Creates the backend, creating `directory` if needed.
    ///
    /// # Errors
    /// Returns IO error if the directory cannot be created.
    pub fn new(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory)?;
        Ok(Self {
            directory: directory.to_path_buf(),
        })
    }

    /// Path of the chunk directory named `name`.
    #[must_use]
    pub fn channel_dir(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }
}

impl PipeBackend for ChunkFileBackend {
    type Source = ChunkReader;
    type Sink = ChunkWriter;

    fn pipe_type(&self) -> PipeType {
        PipeType::ChunkFile
    }

    fn location(&self) -> &Path {
        &self.directory
    }

    fn open_source(&mut self, role: Role) -> Result<ChunkReader> {
        ChunkReader::open(&self.channel_dir(role.incoming()))
    }

    fn open_sink(&mut self, role: Role) -> Result<ChunkWriter> {
        ChunkWriter::open(&self.channel_dir(role.outgoing()))
    }

    fn release(&mut self, _peer_closed: bool) -> Result<bool> {
        let in_use = [Role::Yin, Role::Yang]
            .iter()
            .any(|role| self.channel_dir(role.outgoing()).exists());
        if in_use {
            return Ok(false);
        }
        remove_dir_all_if_exists(&self.directory)?;
        Ok(true)
    }
}

impl Pipe<ChunkFileBackend> {
    /// Opens one end of a chunk-file pipe in `directory`.
    ///
    /// # Errors
    /// Returns IO error if the directory cannot be created.
    pub fn open(directory: &Path, role: Role) -> Result<Self> {
        Ok(Self::new(ChunkFileBackend::new(directory)?, role))
    }
}
