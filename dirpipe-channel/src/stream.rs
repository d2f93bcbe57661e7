//! Blocking adapters over non-blocking channels.
//!
//! [`read_blocking`] and [`write_blocking`] retry the underlying operation
//! through a [`Poller`] until it makes progress. [`ChannelReader`] and
//! [`ChannelWriter`] expose the same behaviour as [`std::io::Read`] and
//! [`std::io::Write`]; their errors carry the typed [`Error`], recoverable
//! with [`Error::from_io`].

use crate::{Channel, ChannelState, ReadOutcome, ReadableChannel, WritableChannel};
use dirpipe_core::{CancellationToken, Error, PollConfig, Poller, Result};
use std::io;
use std::time::Duration;

/// Reads at least one byte, or returns `0` at end of stream.
///
/// # Errors
/// Returns [`Error::Timeout`] or [`Error::Cancelled`] from the poller, or any
/// channel error.
pub fn read_blocking<C>(channel: &mut C, poller: &Poller, dst: &mut [u8]) -> Result<usize>
where
    C: ReadableChannel + ?Sized,
{
    if dst.is_empty() {
        return Ok(0);
    }
    poller.poll_until(|| match channel.read(dst)? {
        ReadOutcome::Data(n) if n > 0 => Ok(Some(n)),
        ReadOutcome::Eof => Ok(Some(0)),
        _ if channel.state() == ChannelState::ClosedByPeer => match channel.read(dst)? {
            ReadOutcome::Data(n) => Ok(Some(n)),
            ReadOutcome::Pending | ReadOutcome::Eof => Ok(Some(0)),
        },
        _ => Ok(None),
    })
}

/// Writes at least one byte of `src` and returns how many were accepted.
///
/// # Errors
/// Returns [`Error::ChannelClosed`] once the reader has closed, otherwise
/// the poller or channel error.
pub fn write_blocking<C>(channel: &mut C, poller: &Poller, src: &[u8]) -> Result<usize>
where
    C: WritableChannel + ?Sized,
{
    if src.is_empty() {
        return Ok(0);
    }
    poller.poll_until(|| {
        let n = channel.write(src)?;
        if n > 0 {
            Ok(Some(n))
        } else if channel.state() == ChannelState::ClosedByPeer {
            Err(Error::ChannelClosed)
        } else {
            Ok(None)
        }
    })
}

/// Writes all of `src`, waiting for room as needed.
///
/// The poller's timeout applies to each wait for progress, not to the whole
/// buffer.
///
/// # Errors
/// See [`write_blocking`].
pub fn write_all_blocking<C>(channel: &mut C, poller: &Poller, mut src: &[u8]) -> Result<()>
where
    C: WritableChannel + ?Sized,
{
    while !src.is_empty() {
        let n = write_blocking(channel, poller, src)?;
        src = &src[n..];
    }
    Ok(())
}

/// Blocking [`io::Read`] over a readable channel.
#[derive(Debug)]
pub struct ChannelReader<C> {
    channel: C,
    poller: Poller,
}

impl<C: ReadableChannel> ChannelReader<C> {
    /// Wraps a channel with the default poll interval and no timeout.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self::with_poller(channel, Poller::default())
    }

    /// Wraps a channel with an explicit poller.
    #[must_use]
    pub fn with_poller(channel: C, poller: Poller) -> Self {
        Self { channel, poller }
    }

    /// Sets the timeout applied to each read.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poller.set_timeout(timeout);
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation(token);
        self
    }

    /// Returns the polling parameters.
    #[must_use]
    pub fn poll_config(&self) -> PollConfig {
        self.poller.config()
    }

    /// Reads until EOF, returning everything read.
    ///
    /// # Errors
    /// See [`read_blocking`].
    pub fn read_to_end_blocking(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match read_blocking(&mut self.channel, &self.poller, &mut buf)? {
                0 => return Ok(out),
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Closes the underlying channel.
    ///
    /// # Errors
    /// See [`Channel::close`].
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }

    /// Returns a reference to the channel.
    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    /// Returns a mutable reference to the channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Unwraps the channel.
    pub fn into_inner(self) -> C {
        self.channel
    }
}

impl<C: ReadableChannel> io::Read for ChannelReader<C> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(read_blocking(&mut self.channel, &self.poller, buf)?)
    }
}

/// Blocking [`io::Write`] over a writable channel.
#[derive(Debug)]
pub struct ChannelWriter<C> {
    channel: C,
    poller: Poller,
}

impl<C: WritableChannel> ChannelWriter<C> {
    /// Wraps a channel with the default poll interval and no timeout.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self::with_poller(channel, Poller::default())
    }

    /// Wraps a channel with an explicit poller.
    #[must_use]
    pub fn with_poller(channel: C, poller: Poller) -> Self {
        Self { channel, poller }
    }

    /// Sets the timeout applied to each wait for room.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.poller.set_timeout(timeout);
        self
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.poller = self.poller.with_cancellation(token);
        self
    }

    /// Returns the polling parameters.
    #[must_use]
    pub fn poll_config(&self) -> PollConfig {
        self.poller.config()
    }

    /// Writes the whole buffer.
    ///
    /// # Errors
    /// See [`write_all_blocking`].
    pub fn write_all_blocking(&mut self, src: &[u8]) -> Result<()> {
        write_all_blocking(&mut self.channel, &self.poller, src)
    }

    /// Closes the underlying channel.
    ///
    /// # Errors
    /// See [`Channel::close`].
    pub fn close(&mut self) -> Result<()> {
        self.channel.close()
    }

    /// Returns a reference to the channel.
    pub fn get_ref(&self) -> &C {
        &self.channel
    }

    /// Returns a mutable reference to the channel.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Unwraps the channel.
    pub fn into_inner(self) -> C {
        self.channel
    }
}

impl<C: WritableChannel> io::Write for ChannelWriter<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(write_blocking(&mut self.channel, &self.poller, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
