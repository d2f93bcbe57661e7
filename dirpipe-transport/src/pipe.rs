//! Bidirectional pipes built from two one-directional channels.
//!
//! A [`Pipe`] owns one [`PipeBackend`] and opens its two channels lazily.
//! The two ends of a pipe use opposite [`Role`]s on the same location, so
//! one end's sink is the other end's source.

use crate::kind::PipeType;
use dirpipe_channel::{
    Channel, ChannelReader, ChannelState, ChannelWriter, ReadableChannel, WritableChannel,
};
use dirpipe_core::{Error, Poller, Result, Role};
use std::path::Path;

/// Storage a pipe is built on.
pub trait PipeBackend: Send {
    /// Channel carrying bytes towards this end.
    type Source: ReadableChannel;
    /// Channel carrying bytes away from this end.
    type Sink: WritableChannel;

    /// Transport implemented by this backend.
    fn pipe_type(&self) -> PipeType;

    /// Directory or file holding the pipe.
    fn location(&self) -> &Path;

    /// Opens the channel `role` reads from.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be opened.
    fn open_source(&mut self, role: Role) -> Result<Self::Source>;

    /// Opens the channel `role` writes into.
    ///
    /// # Errors
    /// Returns an error if the backing storage cannot be opened.
    fn open_sink(&mut self, role: Role) -> Result<Self::Sink>;

    /// Removes the pipe location once nothing in it is still in use.
    ///
    /// Called after both channels were closed with cleanup requested.
    /// `peer_closed` is true when both channels had already been closed by
    /// the other end before this end closed them. Returns true if the
    /// location was removed.
    ///
    /// # Errors
    /// Returns IO error if removal fails.
    fn release(&mut self, peer_closed: bool) -> Result<bool>;
}

/// One end of a bidirectional pipe.
pub struct Pipe<B: PipeBackend> {
    backend: B,
    role: Role,
    source: Option<B::Source>,
    sink: Option<B::Sink>,
    poller: Poller,
    cleanup_on_close: bool,
    closed: bool,
}

impl<B: PipeBackend> Pipe<B> {
    /// Creates a pipe end over `backend`.
    #[must_use]
    pub fn new(backend: B, role: Role) -> Self {
        Self {
            backend,
            role,
            source: None,
            sink: None,
            poller: Poller::default(),
            cleanup_on_close: false,
            closed: false,
        }
    }

    /// Replaces the poller used by [`reader`](Self::reader) and
    /// [`writer`](Self::writer).
    #[must_use]
    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Returns the poller used by the blocking adapters.
    #[must_use]
    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// Returns the role of this end.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the transport type.
    #[must_use]
    pub fn pipe_type(&self) -> PipeType {
        self.backend.pipe_type()
    }

    /// Returns the directory or file holding the pipe.
    #[must_use]
    pub fn location(&self) -> &Path {
        self.backend.location()
    }

    /// Returns the backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns whether cleanup on close was requested.
    #[must_use]
    pub fn cleanup_on_close(&self) -> bool {
        self.cleanup_on_close
    }

    /// Requests removal of the backing storage once both ends have closed.
    ///
    /// The flag applies to channels already open and to those opened later.
    pub fn set_cleanup_on_close(&mut self, cleanup: bool) {
        self.cleanup_on_close = cleanup;
        if let Some(source) = self.source.as_mut() {
            source.set_cleanup_on_close(cleanup);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.set_cleanup_on_close(cleanup);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::state("pipe is closed"))
        } else {
            Ok(())
        }
    }

    /// Returns the incoming channel, opening it on first use.
    ///
    /// # Errors
    /// Returns [`Error::State`] after close or the backend's open error.
    pub fn source(&mut self) -> Result<&mut B::Source> {
        self.ensure_open()?;
        if self.source.is_none() {
            let mut source = self.backend.open_source(self.role)?;
            source.set_cleanup_on_close(self.cleanup_on_close);
            self.source = Some(source);
        }
        self.source
            .as_mut()
            .ok_or_else(|| Error::state("source channel unavailable"))
    }

    /// Returns the outgoing channel, opening it on first use.
    ///
    /// # Errors
    /// Returns [`Error::State`] after close or the backend's open error.
    pub fn sink(&mut self) -> Result<&mut B::Sink> {
        self.ensure_open()?;
        if self.sink.is_none() {
            let mut sink = self.backend.open_sink(self.role)?;
            sink.set_cleanup_on_close(self.cleanup_on_close);
            self.sink = Some(sink);
        }
        self.sink
            .as_mut()
            .ok_or_else(|| Error::state("sink channel unavailable"))
    }

    /// Blocking reader over the source.
    ///
    /// # Errors
    /// See [`source`](Self::source).
    pub fn reader(&mut self) -> Result<ChannelReader<&mut B::Source>> {
        let poller = self.poller.clone();
        Ok(ChannelReader::with_poller(self.source()?, poller))
    }

    /// Blocking writer over the sink.
    ///
    /// # Errors
    /// See [`sink`](Self::sink).
    pub fn writer(&mut self) -> Result<ChannelWriter<&mut B::Sink>> {
        let poller = self.poller.clone();
        Ok(ChannelWriter::with_poller(self.sink()?, poller))
    }

    /// Closes both channels. Closing twice is a no-op.
    ///
    /// With cleanup requested, both channels are opened first so the close
    /// markers this end owes the peer always get written, and the backend
    /// is then asked to release the location.
    ///
    /// # Errors
    /// Returns the first error raised while closing; the pipe counts as
    /// closed regardless.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.cleanup_on_close {
            self.source()?;
            self.sink()?;
        }

        let peer_closed = self
            .source
            .as_ref()
            .is_some_and(|c| c.state() == ChannelState::ClosedByPeer)
            && self
                .sink
                .as_ref()
                .is_some_and(|c| c.state() == ChannelState::ClosedByPeer);

        self.closed = true;
        let source = self.source.as_mut().map_or(Ok(()), |c| c.close());
        let sink = self.sink.as_mut().map_or(Ok(()), |c| c.close());
        source?;
        sink?;

        if self.cleanup_on_close {
            let removed = self.backend.release(peer_closed)?;
            tracing::debug!(
                location = %self.backend.location().display(),
                role = %self.role,
                removed,
                "pipe closed"
            );
        }
        Ok(())
    }
}

impl<B: PipeBackend> std::fmt::Debug for Pipe<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe")
            .field("type", &self.backend.pipe_type())
            .field("location", &self.backend.location())
            .field("role", &self.role)
            .field("source_open", &self.source.is_some())
            .field("sink_open", &self.sink.is_some())
            .field("cleanup_on_close", &self.cleanup_on_close)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<B: PipeBackend> Drop for Pipe<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(
                location = %self.backend.location().display(),
                "failed to close pipe: {e}"
            );
        }
    }
}
