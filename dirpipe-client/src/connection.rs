//! A negotiated pipe used as one duplex byte stream.

use crate::builder::{Client, ClientBuilder};
use crate::error::ClientError;
use dirpipe_channel::{ChannelReader, ChannelWriter, ReadableChannel, WritableChannel};
use dirpipe_transport::AnyPipe;
use std::io::{self, Read, Write};
use std::path::PathBuf;

/// Address scheme accepted by [`Connection::open`].
pub const SCHEME: &str = "dirpipe";

/// Resolves an address into a connect directory.
///
/// Accepts a plain path or `dirpipe://<path>`.
///
/// # Errors
/// Returns [`ClientError::InvalidAddress`] for other schemes or an empty
/// path.
pub fn parse_address(address: &str) -> Result<PathBuf, ClientError> {
    let invalid = || ClientError::InvalidAddress {
        address: address.to_owned(),
    };
    let path = match address.split_once("://") {
        Some((scheme, rest)) if scheme == SCHEME => rest,
        Some(_) => return Err(invalid()),
        None => address,
    };
    if path.is_empty() {
        return Err(invalid());
    }
    Ok(PathBuf::from(path))
}

/// Client end of a pipe, read and written as one stream.
#[derive(Debug)]
pub struct Connection {
    pipe: AnyPipe,
}

impl Connection {
    /// Connects to the server at `address` with default settings.
    ///
    /// # Errors
    /// See [`parse_address`] and [`Client::connect`].
    pub fn open(address: &str) -> Result<Self, ClientError> {
        let connect_dir = parse_address(address)?;
        Self::connect(&ClientBuilder::new(connect_dir).build())
    }

    /// Connects with a configured client.
    ///
    /// # Errors
    /// See [`Client::connect`].
    pub fn connect(client: &Client) -> Result<Self, ClientError> {
        Ok(Self::from(client.connect()?))
    }

    /// Returns the underlying pipe.
    #[must_use]
    pub fn pipe(&self) -> &AnyPipe {
        &self.pipe
    }

    /// Returns the underlying pipe mutably.
    pub fn pipe_mut(&mut self) -> &mut AnyPipe {
        &mut self.pipe
    }

    /// Blocking reader over the incoming direction.
    ///
    /// # Errors
    /// Returns an error if the connection is closed or the channel cannot
    /// be opened.
    pub fn input(&mut self) -> Result<ChannelReader<&mut dyn ReadableChannel>, ClientError> {
        Ok(self.pipe.reader()?)
    }

    /// Blocking writer over the outgoing direction.
    ///
    /// # Errors
    /// Returns an error if the connection is closed or the channel cannot
    /// be opened.
    pub fn output(&mut self) -> Result<ChannelWriter<&mut dyn WritableChannel>, ClientError> {
        Ok(self.pipe.writer()?)
    }

    /// Closes both directions and removes the pipe once the server has
    /// closed too.
    ///
    /// # Errors
    /// Returns an error if a channel fails to close.
    pub fn close(&mut self) -> Result<(), ClientError> {
        self.pipe.set_cleanup_on_close(true);
        Ok(self.pipe.close()?)
    }

    /// Returns the pipe, leaving cleanup to the caller.
    #[must_use]
    pub fn into_pipe(self) -> AnyPipe {
        self.pipe
    }
}

impl From<AnyPipe> for Connection {
    fn from(pipe: AnyPipe) -> Self {
        Self { pipe }
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.pipe.reader()?.read(buf)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pipe.writer()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
