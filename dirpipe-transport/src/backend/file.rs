//! Pipes over one growing file per direction.
//!
//! Layout: `<dir>/yinToYang.channel` and `<dir>/yangToYin.channel`, each
//! with its `.closed` marker next to it.

use super::remove_dir_all_if_exists;
use crate::kind::PipeType;
use crate::pipe::{Pipe, PipeBackend};
use dirpipe_channel::{FileReader, FileWriter};
use dirpipe_core::{Result, Role};
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of a channel file.
pub const CHANNEL_EXTENSION: &str = "channel";

/// Pipe over plain files.
pub type FilePipe = Pipe<FileBackend>;

/// Backend keeping both channels as files in one directory.
#[derive(Debug)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
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

    /// Path of the channel file named `name`.
    #[must_use]
    pub fn channel_path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.{CHANNEL_EXTENSION}"))
    }
}

impl PipeBackend for FileBackend {
    type Source = FileReader;
    type Sink = FileWriter;

    fn pipe_type(&self) -> PipeType {
        PipeType::File
    }

    fn location(&self) -> &Path {
        &self.directory
    }

    fn open_source(&mut self, role: Role) -> Result<FileReader> {
        FileReader::open(&self.channel_path(role.incoming()))
    }

    fn open_sink(&mut self, role: Role) -> Result<FileWriter> {
        FileWriter::open(&self.channel_path(role.outgoing()))
    }

    fn release(&mut self, _peer_closed: bool) -> Result<bool> {
        let in_use = [Role::Yin, Role::Yang]
            .iter()
            .any(|role| self.channel_path(role.outgoing()).exists());
        if in_use {
            return Ok(false);
        }
        remove_dir_all_if_exists(&self.directory)?;
        Ok(true)
    }
}

impl Pipe<FileBackend> {
    /// Opens one end of a file pipe in `directory`.
    ///
    /// # Errors
    /// Returns IO error if the directory cannot be created.
    pub fn open(directory: &Path, role: Role) -> Result<Self> {
        Ok(Self::new(FileBackend::new(directory)?, role))
    }
}
