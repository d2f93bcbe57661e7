//! Pipes over a memory-mapped file.
//!
//! Both directions live in one file of fixed size; see
//! [`SharedMemory`] for the split into two ring buffers.

use crate::kind::PipeType;
use crate::pipe::{Pipe, PipeBackend};
use dirpipe_channel::{RingBufferReader, RingBufferWriter, SharedMemory, SharedMemoryConfig};
use dirpipe_core::{Error, Result, Role};
use std::io::ErrorKind;
use std::path::Path;

pub use dirpipe_channel::shm::DEFAULT_SHARED_MEMORY_SIZE;

/// Pipe over shared memory.
pub type SharedMemoryPipe = Pipe<SharedMemoryBackend>;

/// Backend mapping one file that holds both channels.
#[derive(Debug)]
pub struct SharedMemoryBackend {
    memory: SharedMemory,
}

impl SharedMemoryBackend {
    /// Maps `file`, creating it with `size` bytes if needed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or mapped.
    pub fn new(file: &Path, size: usize) -> Result<Self> {
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            memory: SharedMemory::open(file, SharedMemoryConfig::with_size(size))?,
        })
    }

    /// Returns the mapped memory.
    #[must_use]
    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Size of the backing file in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.memory.size()
    }
}

impl PipeBackend for SharedMemoryBackend {
    type Source = RingBufferReader;
    type Sink = RingBufferWriter;

    fn pipe_type(&self) -> PipeType {
        PipeType::SharedMemory
    }

    fn location(&self) -> &Path {
        self.memory.path()
    }

    fn open_source(&mut self, role: Role) -> Result<RingBufferReader> {
        RingBufferReader::open(&self.memory, role)
    }

    fn open_sink(&mut self, role: Role) -> Result<RingBufferWriter> {
        RingBufferWriter::open(&self.memory, role)
    }

    // Queues carry no per-end marker, so the file can only be removed by the
    // end that finds both queues closed by the peer. If one end closed its
    // sink early and the other closed everything before that end's close,
    // neither sees both queues peer-closed and the file stays behind.
    fn release(&mut self, peer_closed: bool) -> Result<bool> {
        if !peer_closed {
            return Ok(false);
        }
        match std::fs::remove_file(self.memory.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Pipe<SharedMemoryBackend> {
    /// Opens one end of a shared-memory pipe backed by `file`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or mapped.
    pub fn open(file: &Path, role: Role, size: usize) -> Result<Self> {
        Ok(Self::new(SharedMemoryBackend::new(file, size)?, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirpipe_channel::{Channel, ChannelState, ReadOutcome, ReadableChannel, WritableChannel};
    use dirpipe_core::{PollConfig, Poller};
    use std::io::{Read, Write};
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    fn fast() -> Poller {
        Poller::new(PollConfig {
            interval: Duration::from_millis(1),
            timeout: Some(Duration::from_secs(10)),
        })
    }

    #[test]
    fn test_halves_carry_opposite_directions() {
        let root = tempdir().unwrap();
        let file = root.path().join("pipe.shm");
        let size = DEFAULT_SHARED_MEMORY_SIZE;
        let mut yin = SharedMemoryPipe::open(&file, Role::Yin, size).unwrap();
        let mut yang = SharedMemoryPipe::open(&file, Role::Yang, size).unwrap();

        assert_eq!(yin.sink().unwrap().write(b"to yang").unwrap(), 7);
        assert_eq!(yang.sink().unwrap().write(b"to yin").unwrap(), 6);

        let mut buf = [0u8; 16];
        assert_eq!(yang.source().unwrap().read(&mut buf).unwrap(), ReadOutcome::Data(7));
        assert_eq!(&buf[..7], b"to yang");
        assert_eq!(yin.source().unwrap().read(&mut buf).unwrap(), ReadOutcome::Data(6));
        assert_eq!(&buf[..6], b"to yin");
        assert_eq!(std::fs::metadata(&file).unwrap().len(), 4096);
    }

    #[test]
    fn test_stream_larger_than_capacity() {
        let root = tempdir().unwrap();
        let file = root.path().join("pipe.shm");
        let mut yin = SharedMemoryPipe::open(&file, Role::Yin, 256)
            .unwrap()
            .with_poller(fast());
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let reader_file = file.clone();
        let consumer = thread::spawn(move || {
            let mut yang = SharedMemoryPipe::open(&reader_file, Role::Yang, 256)
                .unwrap()
                .with_poller(fast());
            let mut out = Vec::new();
            yang.reader().unwrap().read_to_end(&mut out).unwrap();
            out
        });

        yin.writer().unwrap().write_all(&data).unwrap();
        yin.close().unwrap();
        assert_eq!(consumer.join().unwrap(), data);
    }

    #[test]
    fn test_cleanup_by_last_closer() {
        let root = tempdir().unwrap();
        let file = root.path().join("pipe.shm");
        let mut yin = SharedMemoryPipe::open(&file, Role::Yin, 1024).unwrap();
        let mut yang = SharedMemoryPipe::open(&file, Role::Yang, 1024).unwrap();
        yin.set_cleanup_on_close(true);
        yang.set_cleanup_on_close(true);

        yin.close().unwrap();
        assert!(file.exists());
        assert_eq!(yang.sink().unwrap().state(), ChannelState::ClosedByPeer);
        assert_eq!(yang.source().unwrap().state(), ChannelState::ClosedByPeer);

        yang.close().unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_no_cleanup_keeps_file() {
        let root = tempdir().unwrap();
        let file = root.path().join("pipe.shm");
        let mut yin = SharedMemoryPipe::open(&file, Role::Yin, 1024).unwrap();
        let mut yang = SharedMemoryPipe::open(&file, Role::Yang, 1024).unwrap();
        yin.sink().unwrap().close().unwrap();

        yin.close().unwrap();
        yang.close().unwrap();
        assert!(file.exists());
    }
}
