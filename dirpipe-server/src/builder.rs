//! Server builder and main server implementation.

use crate::error::ServerError;
use crate::handler::PipeHandler;
use crate::request::{RequestSession, Served, claim, pending_requests};
use dirpipe_core::wait::DEFAULT_POLL_INTERVAL;
use dirpipe_core::{CancellationToken, Error, PollConfig, Poller, Status};
use dirpipe_transport::{AnyPipe, DEFAULT_SHARED_MEMORY_SIZE, PipeType};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for reading one request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the default pipe directory inside the connect directory.
pub const DEFAULT_PIPE_DIRECTORY: &str = ".pipes";

/// Settings shared by the server and its request sessions.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub(crate) connect_dir: PathBuf,
    pub(crate) pipe_dir: PathBuf,
    pub(crate) supported: Vec<PipeType>,
    pub(crate) shared_memory_size: usize,
    pub(crate) accept_timeout: Option<Duration>,
    pub(crate) request_timeout: Duration,
    pub(crate) poll_interval: Duration,
}

impl ServerConfig {
    /// Directory scanned for requests.
    #[must_use]
    pub fn connect_directory(&self) -> &Path {
        &self.connect_dir
    }

    /// Directory new pipes are created in.
    #[must_use]
    pub fn pipe_directory(&self) -> &Path {
        &self.pipe_dir
    }

    /// Pipe types in order of preference.
    #[must_use]
    pub fn supported_types(&self) -> &[PipeType] {
        &self.supported
    }

    /// Size of shared memory pipe files.
    #[must_use]
    pub fn shared_memory_size(&self) -> usize {
        self.shared_memory_size
    }

    pub(crate) fn request_poll(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            timeout: Some(self.request_timeout),
        }
    }

    pub(crate) fn pipe_poll(&self) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            timeout: None,
        }
    }

    fn accept_poll(&self, timeout: Option<Duration>) -> PollConfig {
        PollConfig {
            interval: self.poll_interval,
            timeout,
        }
    }
}

/// Builder for configuring and creating a server.
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    connect_dir: PathBuf,
    pipe_dir: Option<PathBuf>,
    supported: Vec<PipeType>,
    shared_memory_size: usize,
    accept_timeout: Option<Duration>,
    request_timeout: Duration,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl ServerBuilder {
    /// Creates a builder serving requests placed in `connect_dir`.
    #[must_use]
    pub fn new(connect_dir: impl AsRef<Path>) -> Self {
        Self {
            connect_dir: connect_dir.as_ref().to_path_buf(),
            pipe_dir: None,
            supported: PipeType::ALL.to_vec(),
            shared_memory_size: DEFAULT_SHARED_MEMORY_SIZE,
            accept_timeout: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    /// Sets the directory new pipes are created in.
    ///
    /// Defaults to `.pipes` inside the connect directory.
    #[must_use]
    pub fn pipe_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.pipe_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Sets the supported pipe types in order of preference.
    #[must_use]
    pub fn supported_types(mut self, types: impl IntoIterator<Item = PipeType>) -> Self {
        self.supported = types.into_iter().collect();
        self
    }

    /// Sets the size of shared memory pipe files.
    #[must_use]
    pub fn shared_memory_size(mut self, size: usize) -> Self {
        self.shared_memory_size = size;
        self
    }

    /// Sets how long [`Server::accept`] waits for a request.
    #[must_use]
    pub fn accept_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.accept_timeout = timeout;
        self
    }

    /// Sets how long the server waits for a client to finish its request.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the pause between two directory scans or channel polls.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Uses an existing cancellation token for shutdown.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Builds the server and handle, creating both directories.
    ///
    /// # Errors
    /// Returns a configuration error if no pipe type is supported, or an IO
    /// error if a directory cannot be created.
    pub fn build(self) -> Result<(Server, ServerHandle), ServerError> {
        if self.supported.is_empty() {
            return Err(ServerError::config("no supported pipe types"));
        }
        let pipe_dir = self
            .pipe_dir
            .unwrap_or_else(|| self.connect_dir.join(DEFAULT_PIPE_DIRECTORY));
        fs::create_dir_all(&self.connect_dir)?;
        fs::create_dir_all(&pipe_dir)?;

        let config = ServerConfig {
            connect_dir: self.connect_dir,
            pipe_dir,
            supported: self.supported,
            shared_memory_size: self.shared_memory_size,
            accept_timeout: self.accept_timeout,
            request_timeout: self.request_timeout,
            poll_interval: self.poll_interval,
        };
        tracing::debug!(?config, "server configured");

        let handle = ServerHandle {
            cancel: self.cancel.clone(),
        };
        let server = Server {
            config,
            cancel: self.cancel,
        };
        Ok((server, handle))
    }
}

/// Server answering connect requests in one directory.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a builder for a server on `connect_dir`.
    #[must_use]
    pub fn builder(connect_dir: impl AsRef<Path>) -> ServerBuilder {
        ServerBuilder::new(connect_dir)
    }

    /// Returns the server settings.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns a new handle controlling this server.
    #[must_use]
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Serves every currently pending request once, without waiting for new
    /// ones.
    ///
    /// # Errors
    /// Returns an error if the connect directory cannot be listed, or
    /// [`ServerError::Shutdown`] after shutdown.
    pub fn serve_pending(&self) -> Result<Vec<Served>, ServerError> {
        if self.cancel.is_cancelled() {
            return Err(ServerError::Shutdown);
        }
        let mut served = Vec::new();
        for request in pending_requests(&self.config.connect_dir)? {
            if let Some(outcome) = self.serve_one(&request) {
                served.push(outcome);
            }
        }
        Ok(served)
    }

    /// Waits for a request and returns the server end of the created pipe.
    ///
    /// Failed requests are answered and skipped. Waits at most the accept
    /// timeout, if one is configured.
    ///
    /// # Errors
    /// Returns a timeout error when the accept timeout passes,
    /// [`ServerError::Shutdown`] after shutdown, or an error if the connect
    /// directory cannot be listed.
    pub fn accept(&self) -> Result<AnyPipe, ServerError> {
        self.accept_with(self.config.accept_timeout, &mut |status, message| {
            tracing::warn!(%status, reason = message, "request rejected");
        })
    }

    /// Accepts pipes until shutdown and hands each to `handler`.
    ///
    /// The accept timeout does not apply here.
    ///
    /// # Errors
    /// Returns an error if the connect directory cannot be listed.
    pub fn run<H: PipeHandler>(&self, handler: &mut H) -> Result<(), ServerError> {
        tracing::info!(connect = %self.config.connect_dir.display(), "server running");
        loop {
            let accepted = self.accept_with(None, &mut |status, message| {
                tracing::warn!(%status, reason = message, "request rejected");
                handler.on_rejected(status, message);
            });
            match accepted {
                Ok(pipe) => handler.on_pipe(pipe),
                Err(ServerError::Shutdown) => {
                    tracing::info!("server shutdown");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn accept_with(
        &self,
        timeout: Option<Duration>,
        on_rejected: &mut dyn FnMut(Status, &str),
    ) -> Result<AnyPipe, ServerError> {
        let poller =
            Poller::new(self.config.accept_poll(timeout)).with_cancellation(self.cancel.clone());
        let accepted = poller.poll_until(|| {
            for request in pending_requests(&self.config.connect_dir)? {
                match self.serve_one(&request) {
                    Some(Served::Created(pipe)) => return Ok(Some(pipe)),
                    Some(Served::Rejected { status, message }) => on_rejected(status, &message),
                    None => {}
                }
            }
            Ok(None)
        });
        match accepted {
            Ok(pipe) => Ok(pipe),
            Err(Error::Cancelled) => Err(ServerError::Shutdown),
            Err(e) => Err(e.into()),
        }
    }

    /// Claims and serves one request directory. Failures of the connect
    /// pipe itself are logged; the client will time out.
    fn serve_one(&self, request: &Path) -> Option<Served> {
        match claim(request) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!(request = %request.display(), "cannot claim request: {e}");
                return None;
            }
        }

        match RequestSession::new(request, &self.config, self.cancel.clone()).serve() {
            Ok(served) => {
                if let Served::Created(pipe) = &served {
                    tracing::info!(
                        request = %request.display(),
                        pipe_type = %pipe.pipe_type(),
                        location = %pipe.location().display(),
                        "connection served"
                    );
                }
                Some(served)
            }
            Err(e) => {
                tracing::warn!(request = %request.display(), "failed to serve request: {e}");
                None
            }
        }
    }
}

/// Handle for controlling the server from outside.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    cancel: CancellationToken,
}

impl ServerHandle {
    /// Requests server shutdown, waking a blocked [`Server::accept`] or
    /// [`Server::run`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns true once shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
