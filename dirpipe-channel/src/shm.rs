//! Ring-buffer channels over a memory-mapped file.
//!
//! The file is split into two equal halves, each holding one
//! [`RingBufferQueue`]: half 0 carries bytes written by [`Role::Yin`], half 1
//! bytes written by [`Role::Yang`].

use crate::{Channel, ChannelState, Lifecycle, ReadOutcome, ReadableChannel, WritableChannel};
use dirpipe_core::{Error, Result, RingBufferQueue, Role};
use memmap2::MmapRaw;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default size of a shared memory file in bytes.
pub const DEFAULT_SHARED_MEMORY_SIZE: usize = 4096;

/// How a pipe's shared memory file is opened.
///
/// Both ends of a pipe must agree on `size`; each direction gets half of
/// it, minus the queue header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedMemoryConfig {
    /// Length of the mapped file. Grown to this length if shorter.
    pub size: usize,
    /// Create the file when the peer has not yet; otherwise a missing file
    /// is an IO error.
    pub create: bool,
}

impl SharedMemoryConfig {
    /// Creating config for a file of `size` bytes.
    #[must_use]
    pub const fn with_size(size: usize) -> Self {
        Self { size, create: true }
    }

    /// Bytes one direction can hold before the writer sees backpressure.
    #[must_use]
    pub const fn direction_capacity(&self) -> usize {
        half_length(self.size).saturating_sub(RingBufferQueue::HEADER_SIZE + 1)
    }
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self::with_size(DEFAULT_SHARED_MEMORY_SIZE)
    }
}

/// Half of `size`, rounded down so both halves stay 8-byte aligned.
const fn half_length(size: usize) -> usize {
    (size / 2) & !7
}

/// Shared memory file mapped into this process.
#[derive(Debug, Clone)]
pub struct SharedMemory {
    map: Arc<MmapRaw>,
    size: usize,
    path: PathBuf,
}

impl SharedMemory {
    /// Smallest file that still holds two one-byte queues.
    pub const MIN_SIZE: usize = 2 * (RingBufferQueue::MIN_LENGTH + 4);

    /// Creates or opens a shared memory file.
    ///
    /// An existing file is never truncated; it is only grown to `config.size`
    /// so that two peers opening the same path concurrently agree on its
    /// contents.
    ///
    /// # Arguments
    /// * `path` - Path to the backing file
    /// * `config` - Configuration options
    ///
    /// # Errors
    /// Returns a state error for sizes below [`MIN_SIZE`](Self::MIN_SIZE) or
    /// an IO error if file operations fail.
    pub fn open(path: &Path, config: SharedMemoryConfig) -> Result<Self> {
        if config.size < Self::MIN_SIZE {
            return Err(Error::state(format!(
                "shared memory size {} is smaller than {}",
                config.size,
                Self::MIN_SIZE
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create)
            .truncate(false)
            .open(path)?;

        if file.metadata()?.len() < config.size as u64 {
            file.set_len(config.size as u64)?;
        }

        let map = MmapRaw::map_raw(&file)?;
        tracing::debug!(path = %path.display(), size = config.size, "mapped shared memory");

        Ok(Self {
            map: Arc::new(map),
            size: config.size,
            path: path.to_path_buf(),
        })
    }

    /// Returns the size of the shared memory region.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Length of each half, rounded down so both halves stay 8-byte aligned.
    #[must_use]
    pub fn half_length(&self) -> usize {
        half_length(self.size)
    }

    /// Returns the initialized queue carrying bytes written by `writer`.
    ///
    /// # Errors
    /// Returns a state error if the half does not form a valid queue region.
    pub fn queue(&self, writer: Role) -> Result<RingBufferQueue> {
        let half = match writer {
            Role::Yin => 0,
            Role::Yang => 1,
        };
        let length = self.half_length();
        let queue = RingBufferQueue::new(Arc::clone(&self.map), half * length, length)?;
        queue.init();
        Ok(queue)
    }

    /// Flushes changes to the backing file.
    ///
    /// # Errors
    /// Returns IO error if flush fails.
    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

/// Reading end of a ring-buffer channel.
#[derive(Debug)]
pub struct RingBufferReader {
    queue: RingBufferQueue,
    lifecycle: Lifecycle,
}

impl RingBufferReader {
    /// Wraps a queue, initializing it if the writer has not yet.
    #[must_use]
    pub fn new(queue: RingBufferQueue) -> Self {
        queue.init();
        Self {
            queue,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Opens the end of `memory` that `role` reads from.
    ///
    /// # Errors
    /// Returns a state error if the queue region is invalid.
    pub fn open(memory: &SharedMemory, role: Role) -> Result<Self> {
        Ok(Self::new(memory.queue(role.opposite())?))
    }

    /// Returns the underlying queue.
    #[must_use]
    pub fn queue(&self) -> &RingBufferQueue {
        &self.queue
    }

    fn peer_closed(&self) -> bool {
        matches!(self.queue.is_closed(), Ok(true))
    }
}

impl Channel for RingBufferReader {
    fn state(&self) -> ChannelState {
        self.lifecycle.state(|| self.peer_closed())
    }

    fn close(&mut self) -> Result<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        self.queue.close()?;
        self.lifecycle.mark_closed();
        Ok(())
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl ReadableChannel for RingBufferReader {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        self.lifecycle.ensure_open()?;
        if dst.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let n = self.queue.poll_slice(dst)?;
        if n > 0 {
            return Ok(ReadOutcome::Data(n));
        }
        if !self.queue.is_closed()? {
            return Ok(ReadOutcome::Pending);
        }

        // The writer may have pushed its last bytes between the poll and the
        // closed check.
        match self.queue.poll_slice(dst)? {
            0 => Ok(ReadOutcome::Eof),
            n => Ok(ReadOutcome::Data(n)),
        }
    }
}

/// Writing end of a ring-buffer channel.
#[derive(Debug)]
pub struct RingBufferWriter {
    queue: RingBufferQueue,
    lifecycle: Lifecycle,
}

impl RingBufferWriter {
    /// Wraps a queue, initializing it if the reader has not yet.
    #[must_use]
    pub fn new(queue: RingBufferQueue) -> Self {
        queue.init();
        Self {
            queue,
            lifecycle: Lifecycle::default(),
        }
    }

    /// Opens the end of `memory` that `role` writes into.
    ///
    /// # Errors
    /// Returns a state error if the queue region is invalid.
    pub fn open(memory: &SharedMemory, role: Role) -> Result<Self> {
        Ok(Self::new(memory.queue(role)?))
    }

    /// Returns the underlying queue.
    #[must_use]
    pub fn queue(&self) -> &RingBufferQueue {
        &self.queue
    }
}

impl Channel for RingBufferWriter {
    fn state(&self) -> ChannelState {
        self.lifecycle
            .state(|| matches!(self.queue.is_closed(), Ok(true)))
    }

    fn close(&mut self) -> Result<()> {
        if self.lifecycle.is_closed() {
            return Ok(());
        }
        self.queue.close()?;
        self.lifecycle.mark_closed();
        Ok(())
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.lifecycle.set_cleanup_on_close(cleanup);
    }
}

impl WritableChannel for RingBufferWriter {
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.lifecycle.ensure_open()?;
        if self.queue.is_closed()? {
            return Err(Error::ChannelClosed);
        }
        self.queue.offer_slice(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pair(size: usize) -> (tempfile::TempDir, RingBufferWriter, RingBufferReader) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipe.shm");
        let config = SharedMemoryConfig::with_size(size);
        let yin = SharedMemory::open(&path, config).unwrap();
        let yang = SharedMemory::open(&path, config).unwrap();
        let writer = RingBufferWriter::open(&yin, Role::Yin).unwrap();
        let reader = RingBufferReader::open(&yang, Role::Yang).unwrap();
        (dir, writer, reader)
    }

    #[test]
    fn test_shared_memory_config_default() {
        let config = SharedMemoryConfig::default();
        assert_eq!(config.size, 4096);
        assert!(config.create);
        assert_eq!(config.direction_capacity(), 2048 - 11);
        assert_eq!(SharedMemoryConfig::with_size(100).direction_capacity(), 48 - 11);
    }

    #[test]
    fn test_shared_memory_halves() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("halves.shm");
        let memory = SharedMemory::open(&path, SharedMemoryConfig::default()).unwrap();

        assert_eq!(memory.size(), 4096);
        assert_eq!(memory.half_length(), 2048);
        assert_eq!(memory.queue(Role::Yin).unwrap().capacity(), 2048 - 11);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
        memory.flush().unwrap();
    }

    #[test]
    fn test_shared_memory_rejects_tiny_size() {
        let dir = tempdir().unwrap();
        let config = SharedMemoryConfig {
            size: 8,
            create: true,
        };
        assert!(SharedMemory::open(&dir.path().join("tiny.shm"), config).is_err());
    }

    #[test]
    fn test_shared_memory_open_without_create() {
        let dir = tempdir().unwrap();
        let config = SharedMemoryConfig {
            size: 4096,
            create: false,
        };
        assert!(matches!(
            SharedMemory::open(&dir.path().join("missing.shm"), config),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, mut writer, mut reader) = pair(4096);
        let mut buf = [0u8; 32];

        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Pending);
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Data(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_backpressure_reports_partial_writes() {
        let (_dir, mut writer, mut reader) = pair(128);
        let capacity = writer.queue().capacity();
        let data = vec![7u8; capacity + 10];

        assert_eq!(writer.write(&data).unwrap(), capacity);
        assert_eq!(writer.write(&data).unwrap(), 0);

        let mut buf = vec![0u8; 10];
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Data(10));
        assert_eq!(writer.write(&data).unwrap(), 10);
    }

    #[test]
    fn test_reader_drains_then_sees_eof() {
        let (_dir, mut writer, mut reader) = pair(4096);
        writer.write(b"last words").unwrap();
        writer.close().unwrap();

        assert_eq!(reader.state(), ChannelState::ClosedByPeer);
        let mut buf = [0u8; 64];
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Data(10));
        assert_eq!(reader.read(&mut buf).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn test_write_after_reader_close_fails() {
        let (_dir, mut writer, mut reader) = pair(4096);
        reader.close().unwrap();

        assert_eq!(writer.state(), ChannelState::ClosedByPeer);
        assert!(matches!(writer.write(b"x"), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_closed_is_absorbing() {
        let (_dir, mut writer, mut reader) = pair(4096);
        writer.close().unwrap();
        writer.close().unwrap();
        reader.close().unwrap();

        assert_eq!(writer.state(), ChannelState::Closed);
        assert_eq!(reader.state(), ChannelState::Closed);
        assert!(matches!(writer.write(b"x"), Err(Error::State { .. })));
        assert!(matches!(reader.read(&mut [0u8; 4]), Err(Error::State { .. })));
    }
}
