//! Channels over a single growing file.
//!
//! The writer appends, the reader follows with its own cursor. Nothing is
//! ever truncated, so disk usage grows for the lifetime of the channel.
//! Either side closing creates `<file>.closed`; when cleanup was requested
//! the side that finds the marker already present deletes both files.

use crate::{
    Channel, ChannelState, Lifecycle, ReadOutcome, ReadableChannel, WritableChannel,
    create_marker, remove_file_if_exists,
};
use dirpipe_core::{Error, Result};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Suffix of the close marker placed next to a channel file.
pub const CLOSED_SUFFIX: &str = ".closed";

/// Returns the close marker path for a channel file.
#[must_use]
pub fn marker_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(CLOSED_SUFFIX);
    PathBuf::from(name)
}

/// State shared by both file channel ends.
#[derive(Debug)]
struct FileEnd {
    path: PathBuf,
    marker: PathBuf,
    file: Option<File>,
    lifecycle: Lifecycle,
}

impl FileEnd {
    fn new(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            marker: marker_path(path),
            file: Some(file),
            lifecycle: Lifecycle::default(),
        }
    }

    fn peer_closed(&self) -> bool {
        self.marker.exists()
    }

    fn state(&self) -> ChannelState {
        self.lifecycle.state(|| self.peer_closed())
    }

    fn file(&mut self) -> Result<&mut File> {
        self.lifecycle.ensure_open()?;
        self.file
            .as_mut()
            .ok_or_else(|| Error::state("channel file already released"))
    }

    fn close(&mut self) -> Result<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        self.lifecycle.mark_closed();
        drop(self.file.take());

        let first = create_marker(&self.marker)?;
        if !first && self.lifecycle.cleanup_on_close() {
            tracing::debug!(path = %self.path.display(), "both ends closed, removing channel file");
            remove_file_if_exists(&self.path)?;
            remove_file_if_exists(&self.marker)?;
        }
        Ok(())
    }
}

/// Reading end of a plain-file channel.
#[derive(Debug)]
pub struct FileReader {
    end: FileEnd,
}

impl FileReader {
    /// Opens the channel file for reading, creating it if the writer has not
    /// yet.
    ///
    /// # Errors
    /// Returns IO error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            end: FileEnd::new(path, file),
        })
    }

    /// Returns the channel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.end.path
    }
}

impl Channel for FileReader {
    fn state(&self) -> ChannelState {
        self.end.state()
    }

    fn close(&mut self) -> Result<()> {
        self.end.close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.end.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl ReadableChannel for FileReader {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        let file = self.end.file()?;
        if dst.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let n = file.read(dst)?;
        if n > 0 {
            return Ok(ReadOutcome::Data(n));
        }
        if !self.end.peer_closed() {
            return Ok(ReadOutcome::Pending);
        }

        // Bytes appended right before the marker appeared.
        match self.end.file()?.read(dst)? {
            0 => Ok(ReadOutcome::Eof),
            n => Ok(ReadOutcome::Data(n)),
        }
    }
}

/// Writing end of a plain-file channel.
#[derive(Debug)]
pub struct FileWriter {
    end: FileEnd,
}

impl FileWriter {
    /// Opens the channel file for appending, creating it if needed.
    ///
    /// # Errors
    /// Returns IO error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            end: FileEnd::new(path, file),
        })
    }

    /// Returns the channel file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.end.path
    }
}

impl Channel for FileWriter {
    fn state(&self) -> ChannelState {
        self.end.state()
    }

    fn close(&mut self) -> Result<()> {
        self.end.close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.end.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl WritableChannel for FileWriter {
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.end.lifecycle.ensure_open()?;
        if self.end.peer_closed() {
            return Err(Error::ChannelClosed);
        }
        self.end.file()?.write_all(src)?;
        Ok(src.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_marker_path() {
        assert_eq!(
            marker_path(Path::new("/tmp/p/yinToYang.channel")),
            PathBuf::from("/tmp/p/yinToYang.channel.closed")
        );
    }

    #[test]
    fn test_reader_follows_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("yinToYang.channel");
        let mut reader = FileReader::open(&path).unwrap();
        let mut writer = FileWriter::open(&path).unwrap();
        let mut buf = [0u8; 16];

        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Pending);
        assert_eq!(writer.write(b"abc").unwrap(), 3);
        assert_eq!(writer.write(b"def").unwrap(), 3);
        assert_eq!(reader.read(&mut buf[..4]).unwrap(), ReadOutcome::Data(4));
        assert_eq!(&buf[..4], b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Data(2));
        assert_eq!(&buf[..2], b"ef");

        // The file only grows.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 6);
    }

    #[test]
    fn test_eof_after_writer_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.channel");
        let mut writer = FileWriter::open(&path).unwrap();
        let mut reader = FileReader::open(&path).unwrap();

        writer.write(b"bye").unwrap();
        writer.close().unwrap();
        assert!(marker_path(&path).exists());
        assert_eq!(reader.state(), ChannelState::ClosedByPeer);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Data(3));
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_write_after_reader_close_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.channel");
        let mut writer = FileWriter::open(&path).unwrap();
        let mut reader = FileReader::open(&path).unwrap();

        reader.close().unwrap();
        assert_eq!(writer.state(), ChannelState::ClosedByPeer);
        assert!(matches!(writer.write(b"x"), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_second_closer_removes_files_with_cleanup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.channel");
        let mut writer = FileWriter::open(&path).unwrap();
        let mut reader = FileReader::open(&path).unwrap();
        writer.set_cleanup_on_close(true);
        reader.set_cleanup_on_close(true);

        writer.close().unwrap();
        assert!(path.exists());
        assert!(marker_path(&path).exists());

        reader.close().unwrap();
        assert!(!path.exists());
        assert!(!marker_path(&path).exists());
    }

    #[test]
    fn test_no_cleanup_keeps_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.channel");
        let mut writer = FileWriter::open(&path).unwrap();
        let mut reader = FileReader::open(&path).unwrap();

        writer.close().unwrap();
        reader.close().unwrap();
        assert!(path.exists());
        assert!(marker_path(&path).exists());
    }

    #[test]
    fn test_closed_is_absorbing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.channel");
        let mut writer = FileWriter::open(&path).unwrap();

        writer.close().unwrap();
        writer.close().unwrap();
        assert_eq!(writer.state(), ChannelState::Closed);
        assert!(matches!(writer.write(b"x"), Err(Error::State { .. })));
    }
}
