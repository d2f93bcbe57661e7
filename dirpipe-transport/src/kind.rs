//! Pipe type names and negotiation.

use dirpipe_core::message::keys;
use dirpipe_core::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Transport backing a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeType {
    /// Ring buffers in a memory-mapped file.
    SharedMemory,
    /// One growing file per direction.
    File,
    /// One directory of chunk files per direction.
    ChunkFile,
}

impl PipeType {
    /// Every pipe type, fastest first.
    pub const ALL: [Self; 3] = [Self::SharedMemory, Self::File, Self::ChunkFile];

    /// Wire name of the type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SharedMemory => "SharedMemoryPipe",
            Self::File => "FilePipe",
            Self::ChunkFile => "ChunkFilePipe",
        }
    }

    /// Response parameter naming the pipe location.
    #[must_use]
    pub const fn location_key(self) -> &'static str {
        match self {
            Self::SharedMemory => keys::FILE,
            Self::File | Self::ChunkFile => keys::DIRECTORY,
        }
    }

    /// Returns true if the pipe lives in a single file rather than a
    /// directory.
    #[must_use]
    pub const fn is_single_file(self) -> bool {
        matches!(self, Self::SharedMemory)
    }
}

impl fmt::Display for PipeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PipeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::parse(format!("unknown pipe type '{s}'")))
    }
}

/// Picks the first of `supported` that the peer accepts.
///
/// An empty `accepted` list leaves the choice to this side. Names this side
/// does not know are ignored.
///
/// # Errors
/// Returns [`Error::Negotiation`] when no type is acceptable to both sides.
pub fn negotiate<S: AsRef<str>>(supported: &[PipeType], accepted: &[S]) -> Result<PipeType> {
    let chosen = if accepted.is_empty() {
        supported.first().copied()
    } else {
        supported
            .iter()
            .copied()
            .find(|kind| accepted.iter().any(|name| name.as_ref() == kind.name()))
    };
    chosen.ok_or_else(|| Error::Negotiation {
        offered: accepted.iter().map(|name| name.as_ref().to_owned()).collect(),
    })
}
