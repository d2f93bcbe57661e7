//! Client builder and the client side of the connect protocol.

use crate::error::ClientError;
use dirpipe_channel::{Channel, ChannelReader};
use dirpipe_core::message::SERVED_MARKER;
use dirpipe_core::wait::DEFAULT_POLL_INTERVAL;
use dirpipe_core::{CancellationToken, Error, PollConfig, Poller, Request, Response, Role};
use dirpipe_transport::{AnyPipe, FilePipe, PipeSpec, PipeType, remove_location};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Builder for configuring and creating a client.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    connect_dir: PathBuf,
    accept: Vec<PipeType>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ClientBuilder {
    /// Creates a builder for the server listening on `connect_dir`.
    ///
    /// By default every pipe type is acceptable and the server chooses.
    #[must_use]
    pub fn new(connect_dir: impl AsRef<Path>) -> Self {
        Self {
            connect_dir: connect_dir.as_ref().to_path_buf(),
            accept: Vec::new(),
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the acceptable pipe types, most preferred first.
    #[must_use]
    pub fn accept_types(mut self, types: impl IntoIterator<Item = PipeType>) -> Self {
        self.accept = types.into_iter().collect();
        self
    }

    /// Sets how long to wait for the server's response.
    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the pause between polls of the connect pipe and the new pipe.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Uses `token` to abort waits of this client and of its pipes.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builds the client.
    #[must_use]
    pub fn build(self) -> Client {
        Client {
            connect_dir: self.connect_dir,
            accept: self.accept,
            timeout: self.timeout,
            poll_interval: self.poll_interval,
            cancel: self.cancel,
        }
    }
}

/// Requests pipes from a server.
#[derive(Debug, Clone)]
pub struct Client {
    connect_dir: PathBuf,
    accept: Vec<PipeType>,
    timeout: Option<Duration>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl Client {
    /// Creates a new client builder.
    #[must_use]
    pub fn builder(connect_dir: impl AsRef<Path>) -> ClientBuilder {
        ClientBuilder::new(connect_dir)
    }

    /// Connect directory of the server.
    #[must_use]
    pub fn connect_directory(&self) -> &Path {
        &self.connect_dir
    }

    /// Acceptable pipe types; empty means any.
    #[must_use]
    pub fn accept_types(&self) -> &[PipeType] {
        &self.accept
    }

    /// Token aborting this client's waits.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Asks the server for a pipe and opens the client's end of it.
    ///
    /// The returned pipe polls with this client's interval and
    /// cancellation token.
    ///
    /// # Errors
    /// Returns [`ClientError::Rejected`] if the server answers with a
    /// failure status, a timeout or cancellation error if the response does
    /// not arrive in time, and a parse or negotiation error if the response
    /// is unusable.
    pub fn connect(&self) -> Result<AnyPipe, ClientError> {
        if !self.connect_dir.is_dir() {
            return Err(ClientError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("no server at {}", self.connect_dir.display()),
            )));
        }

        let request_dir = self.connect_dir.join(uuid::Uuid::new_v4().to_string());
        let mut connect = FilePipe::open(&request_dir, Role::Yin)?;
        connect.set_cleanup_on_close(true);
        tracing::debug!(request = %request_dir.display(), "posted connect request");

        let raw = match self.exchange(&mut connect) {
            Ok(raw) => raw,
            Err(e) => {
                let withdrawn = withdraw(&request_dir);
                if let Err(close_err) = connect.close() {
                    tracing::warn!(error = %close_err, "failed to close connect pipe");
                }
                if withdrawn {
                    remove_location(&request_dir)?;
                }
                return Err(e.into());
            }
        };
        connect.close()?;

        let response = Response::decode(&raw)?;
        if !response.is_success() {
            return Err(ClientError::Rejected {
                status: response.status,
                message: response.message,
            });
        }

        let spec = PipeSpec::from_params(&response.params)?;
        if spec.role != Role::Yin {
            return Err(Error::parse(format!("server assigned role '{}'", spec.role)).into());
        }
        if !self.accept.is_empty() && !self.accept.contains(&spec.pipe_type) {
            return Err(Error::Negotiation {
                offered: self.accept.iter().map(|t| t.name().to_owned()).collect(),
            }
            .into());
        }

        let pipe = spec.open()?.with_poller(self.poller(None));
        tracing::info!(
            location = %spec.location.display(),
            pipe_type = %spec.pipe_type,
            "connected"
        );
        Ok(pipe)
    }

    fn exchange(&self, connect: &mut FilePipe) -> dirpipe_core::Result<Vec<u8>> {
        let request = Request::connect(self.accept.iter().map(|t| t.name()));
        connect.writer()?.write_all_blocking(&request.encode())?;
        connect.sink()?.close()?;

        let poller = self.poller(self.timeout);
        ChannelReader::with_poller(connect.source()?, poller).read_to_end_blocking()
    }

    fn poller(&self, timeout: Option<Duration>) -> Poller {
        Poller::new(PollConfig {
            interval: self.poll_interval,
            timeout,
        })
        .with_cancellation(self.cancel.clone())
    }
}

/// Takes a request back from the connect directory.
///
/// Claims it the way a server would, so no server picks it up afterwards.
/// Returns false if a server already claimed it.
fn withdraw(request_dir: &Path) -> bool {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(request_dir.join(SERVED_MARKER))
        .is_ok()
}
