//! Runtime choice between the pipe transports.
//!
//! The server picks a transport after negotiation and the client learns it
//! from the response, so both handle pipes through [`AnyPipe`]. A
//! [`PipeSpec`] is the description of one end exchanged in between.

use crate::backend::shm::DEFAULT_SHARED_MEMORY_SIZE;
use crate::backend::{ChunkFilePipe, FilePipe, SharedMemoryPipe};
use crate::kind::PipeType;
use dirpipe_channel::{ChannelReader, ChannelWriter, ReadableChannel, WritableChannel};
use dirpipe_core::message::keys;
use dirpipe_core::{Error, Parameters, Poller, Result, Role};
use std::path::{Path, PathBuf};

/// Where and how to open one end of a pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSpec {
    /// Transport.
    pub pipe_type: PipeType,
    /// Role of the end being described.
    pub role: Role,
    /// Pipe directory, or the file for shared memory.
    pub location: PathBuf,
    /// Shared memory file size; `None` for the other transports.
    pub size: Option<usize>,
}

impl PipeSpec {
    /// Describes the same pipe from the other end.
    #[must_use]
    pub fn peer(&self) -> Self {
        Self {
            role: self.role.opposite(),
            ..self.clone()
        }
    }

    /// Converts the description into response parameters.
    ///
    /// # Errors
    /// Returns a state error if the location is not valid UTF-8.
    pub fn to_params(&self) -> Result<Parameters> {
        let location = self.location.to_str().ok_or_else(|| {
            Error::state(format!(
                "pipe location {} is not valid UTF-8",
                self.location.display()
            ))
        })?;

        let mut params = Parameters::new();
        params.insert(keys::TYPE, self.pipe_type.name());
        params.insert(keys::ROLE, self.role.as_str());
        params.insert(self.pipe_type.location_key(), location);
        if let Some(size) = self.size {
            params.insert(keys::SIZE, size.to_string());
        }
        Ok(params)
    }

    /// Reads a description from response parameters.
    ///
    /// # Errors
    /// Returns a parse error for missing or malformed parameters.
    pub fn from_params(params: &Parameters) -> Result<Self> {
        let pipe_type: PipeType = params.require(keys::TYPE)?.parse()?;
        let role = params.require(keys::ROLE)?.parse()?;
        let location = PathBuf::from(params.require(pipe_type.location_key())?);
        let size = match pipe_type {
            PipeType::SharedMemory => {
                let value = params.require(keys::SIZE)?;
                let size = value
                    .parse()
                    .map_err(|_| Error::parse(format!("invalid size '{value}'")))?;
                Some(size)
            }
            PipeType::File | PipeType::ChunkFile => None,
        };
        Ok(Self {
            pipe_type,
            role,
            location,
            size,
        })
    }

    /// Opens the described end.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be opened.
    pub fn open(&self) -> Result<AnyPipe> {
        Ok(match self.pipe_type {
            PipeType::SharedMemory => AnyPipe::SharedMemory(SharedMemoryPipe::open(
                &self.location,
                self.role,
                self.size.unwrap_or(DEFAULT_SHARED_MEMORY_SIZE),
            )?),
            PipeType::File => AnyPipe::File(FilePipe::open(&self.location, self.role)?),
            PipeType::ChunkFile => {
                AnyPipe::ChunkFile(ChunkFilePipe::open(&self.location, self.role)?)
            }
        })
    }
}

/// A pipe end of any transport.
#[derive(Debug)]
pub enum AnyPipe {
    /// Shared memory pipe.
    SharedMemory(SharedMemoryPipe),
    /// Plain file pipe.
    File(FilePipe),
    /// Chunk file pipe.
    ChunkFile(ChunkFilePipe),
}

macro_rules! each_pipe {
    ($value:expr, $pipe:ident => $body:expr) => {
        match $value {
            AnyPipe::SharedMemory($pipe) => $body,
            AnyPipe::File($pipe) => $body,
            AnyPipe::ChunkFile($pipe) => $body,
        }
    };
}

impl AnyPipe {
    /// Returns the transport type.
    #[must_use]
    pub fn pipe_type(&self) -> PipeType {
        each_pipe!(self, p => p.pipe_type())
    }

    /// Returns the role of this end.
    #[must_use]
    pub fn role(&self) -> Role {
        each_pipe!(self, p => p.role())
    }

    /// Returns the directory or file holding the pipe.
    #[must_use]
    pub fn location(&self) -> &Path {
        each_pipe!(self, p => p.location())
    }

    /// Describes this end.
    #[must_use]
    pub fn spec(&self) -> PipeSpec {
        let size = match self {
            Self::SharedMemory(p) => Some(p.backend().size()),
            Self::File(_) | Self::ChunkFile(_) => None,
        };
        PipeSpec {
            pipe_type: self.pipe_type(),
            role: self.role(),
            location: self.location().to_path_buf(),
            size,
        }
    }

    /// Replaces the poller used by the blocking adapters.
    #[must_use]
    pub fn with_poller(self, poller: Poller) -> Self {
        match self {
            Self::SharedMemory(p) => Self::SharedMemory(p.with_poller(poller)),
            Self::File(p) => Self::File(p.with_poller(poller)),
            Self::ChunkFile(p) => Self::ChunkFile(p.with_poller(poller)),
        }
    }

    /// Returns the poller used by the blocking adapters.
    #[must_use]
    pub fn poller(&self) -> &Poller {
        each_pipe!(self, p => p.poller())
    }

    /// Requests removal of the backing storage once both ends have closed.
    pub fn set_cleanup_on_close(&mut self, cleanup: bool) {
        each_pipe!(self, p => p.set_cleanup_on_close(cleanup));
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        each_pipe!(self, p => p.is_closed())
    }

    /// Returns the incoming channel, opening it on first use.
    ///
    /// # Errors
    /// Returns [`Error::State`] after close or the backend's open error.
    pub fn source(&mut self) -> Result<&mut dyn ReadableChannel> {
        each_pipe!(self, p => Ok(p.source()? as &mut dyn ReadableChannel))
    }

    /// Returns the outgoing channel, opening it on first use.
    ///
    /// # Errors
    /// Returns [`Error::State`] after close or the backend's open error.
    pub fn sink(&mut self) -> Result<&mut dyn WritableChannel> {
        each_pipe!(self, p => Ok(p.sink()? as &mut dyn WritableChannel))
    }

    /// Blocking reader over the source.
    ///
    /// # Errors
    /// See [`source`](Self::source).
    pub fn reader(&mut self) -> Result<ChannelReader<&mut dyn ReadableChannel>> {
        let poller = self.poller().clone();
        Ok(ChannelReader::with_poller(self.source()?, poller))
    }

    /// Blocking writer over the sink.
    ///
    /// # Errors
    /// See [`sink`](Self::sink).
    pub fn writer(&mut self) -> Result<ChannelWriter<&mut dyn WritableChannel>> {
        let poller = self.poller().clone();
        Ok(ChannelWriter::with_poller(self.sink()?, poller))
    }

    /// Closes both channels. Closing twice is a no-op.
    ///
    /// # Errors
    /// See [`Pipe::close`](crate::Pipe::close).
    pub fn close(&mut self) -> Result<()> {
        each_pipe!(self, p => p.close())
    }
}

impl From<SharedMemoryPipe> for AnyPipe {
    fn from(pipe: SharedMemoryPipe) -> Self {
        Self::SharedMemory(pipe)
    }
}

impl From<FilePipe> for AnyPipe {
    fn from(pipe: FilePipe) -> Self {
        Self::File(pipe)
    }
}

impl From<ChunkFilePipe> for AnyPipe {
    fn from(pipe: ChunkFilePipe) -> Self {
        Self::ChunkFile(pipe)
    }
}
