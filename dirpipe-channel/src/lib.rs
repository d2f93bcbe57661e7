//! # dirpipe Channel
//!
//! One-directional byte channels between two processes.
//!
//! This crate provides:
//! - [`shm`] - Ring-buffer channels over a memory-mapped file
//! - [`file`] - Channels over a single growing file
//! - [`chunk`] - Channels over a directory of atomically published chunk files
//! - [`stream`] - Blocking `Read`/`Write` adapters with timeout and cancellation
//!
//! Channel operations never block. A read that finds nothing reports
//! [`ReadOutcome::Pending`], a write that finds no room reports `0`; only the
//! [`stream`] adapters turn persistent lack of progress into EOF, a timeout or
//! a closed-channel failure.

pub mod chunk;
pub mod file;
pub mod shm;
pub mod stream;

pub use chunk::{ChunkReader, ChunkWriter};
pub use file::{FileReader, FileWriter};
pub use shm::{RingBufferReader, RingBufferWriter, SharedMemory, SharedMemoryConfig};
pub use stream::{ChannelReader, ChannelWriter};

use dirpipe_core::{Error, Result};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;

/// Observable state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Both ends are open.
    Open,
    /// The other end has closed; this end has not.
    ClosedByPeer,
    /// This end has closed. Terminal.
    Closed,
}

/// Result of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were copied into the destination.
    Data(usize),
    /// Nothing available yet; the peer is still open.
    Pending,
    /// The peer closed and everything it wrote has been read.
    Eof,
}

/// Behaviour shared by both channel directions.
pub trait Channel: Send {
    /// Returns the current state.
    ///
    /// `Open` turns into `ClosedByPeer` only by observing the other end;
    /// `Closed` is reached only through [`close`](Self::close).
    fn state(&self) -> ChannelState;

    /// Closes this end. Closing twice is a no-op.
    ///
    /// # Errors
    /// Returns an error if the close could not be published to the peer.
    fn close(&mut self) -> Result<()>;

    /// Requests removal of the backing files once both ends have closed.
    fn set_cleanup_on_close(&mut self, cleanup: bool);
}

/// Channel end that consumes bytes.
pub trait ReadableChannel: Channel {
    /// Copies available bytes into `dst` without blocking.
    ///
    /// # Errors
    /// Returns [`Error::State`] after [`Channel::close`], or an IO error.
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome>;
}

/// Channel end that produces bytes.
pub trait WritableChannel: Channel {
    /// Accepts as many bytes of `src` as possible without blocking.
    ///
    /// `Ok(0)` means no room right now.
    ///
    /// # Errors
    /// Returns [`Error::ChannelClosed`] when the reader has closed,
    /// [`Error::State`] after [`Channel::close`], or an IO error.
    fn write(&mut self, src: &[u8]) -> Result<usize>;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn state(&self) -> ChannelState {
        (**self).state()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        (**self).set_cleanup_on_close(cleanup);
    }
}

impl<C: ReadableChannel + ?Sized> ReadableChannel for &mut C {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read(dst)
    }
}

impl<C: WritableChannel + ?Sized> WritableChannel for &mut C {
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        (**self).write(src)
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn state(&self) -> ChannelState {
        (**self).state()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn set_cleanup_on_close(&mut self, cleanup: bool) {
        (**self).set_cleanup_on_close(cleanup);
    }
}

impl<C: ReadableChannel + ?Sized> ReadableChannel for Box<C> {
    fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read(dst)
    }
}

impl<C: WritableChannel + ?Sized> WritableChannel for Box<C> {
    fn write(&mut self, src: &[u8]) -> Result<usize> {
        (**self).write(src)
    }
}

/// Local half of the close state machine, shared by every backend.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    closed: bool,
    cleanup_on_close: bool,
}

impl Lifecycle {
    pub(crate) fn state(&self, peer_closed: impl FnOnce() -> bool) -> ChannelState {
        if self.closed {
            ChannelState::Closed
        } else if peer_closed() {
            ChannelState::ClosedByPeer
        } else {
            ChannelState::Open
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::state("channel is closed"))
        } else {
            Ok(())
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn cleanup_on_close(&self) -> bool {
        self.cleanup_on_close
    }

    pub(crate) fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.cleanup_on_close = cleanup;
    }
}

/// Creates a close marker. Returns `false` if it already existed, i.e. the
/// other end closed first.
pub(crate) fn create_marker(path: &Path) -> Result<bool> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Removes a file, treating an already missing file as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
