//! Serving one connect request.
//!
//! A request is a directory under the connect directory holding a
//! [`FilePipe`]; the client is its `Yin` end. The server claims the
//! directory by creating `.served`, reads the request to EOF, negotiates a
//! transport, creates the pipe and answers on the same file pipe.

use crate::builder::ServerConfig;
use dirpipe_channel::ChannelReader;
use dirpipe_core::message::SERVED_MARKER;
use dirpipe_core::{CancellationToken, Error, Poller, Request, Response, Result, Role, Status};
use dirpipe_transport::{AnyPipe, FilePipe, PipeSpec, PipeType, negotiate, remove_location};
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Extension of shared memory pipe files.
pub const SHARED_MEMORY_EXTENSION: &str = "shm";

/// Progress of a request through the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Scanning for an unclaimed request directory.
    WaitingForDirectory,
    /// Reading the request until the client closes its end.
    ReadingRequest,
    /// Decoding the request text.
    ParsingRequest,
    /// Choosing the pipe type.
    SelectingType,
    /// Creating the negotiated pipe.
    CreatingPipe,
    /// Writing the response.
    SendingResponse,
    /// The connect pipe is closed.
    Done,
}

/// Result of serving one request.
#[derive(Debug)]
pub enum Served {
    /// The pipe was created and the client was told where to find it.
    Created(AnyPipe),
    /// The request was answered with a failure status.
    Rejected {
        /// Status sent to the client.
        status: Status,
        /// Text sent with the status.
        message: String,
    },
}

/// Failure answered to the client instead of a pipe.
struct Rejection {
    status: Status,
    message: String,
}

impl Rejection {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Unclaimed request directories, oldest name first.
///
/// Hidden entries, such as the default pipe directory, are never requests.
///
/// # Errors
/// Returns IO error if the connect directory cannot be listed.
pub fn pending_requests(connect_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pending: Vec<PathBuf> = fs::read_dir(connect_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path())
        .filter(|dir| !dir.join(SERVED_MARKER).exists())
        .collect();
    pending.sort();
    Ok(pending)
}

/// Claims a request directory. Exactly one caller succeeds.
///
/// Returns false if another server claimed it first or the client removed
/// it.
///
/// # Errors
/// Returns IO error for failures other than losing the race.
pub fn claim(request_dir: &Path) -> Result<bool> {
    let marker = request_dir.join(SERVED_MARKER);
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), ErrorKind::AlreadyExists | ErrorKind::NotFound) => Ok(false),
        Err(e) => Err(Error::Io(e)),
    }
}

/// One claimed request on its way through [`RequestState`].
pub struct RequestSession<'a> {
    directory: PathBuf,
    config: &'a ServerConfig,
    cancel: CancellationToken,
    state: RequestState,
}

impl<'a> RequestSession<'a> {
    /// Creates a session for a request directory already claimed with
    /// [`claim`].
    #[must_use]
    pub fn new(directory: &Path, config: &'a ServerConfig, cancel: CancellationToken) -> Self {
        Self {
            directory: directory.to_path_buf(),
            config,
            cancel,
            state: RequestState::WaitingForDirectory,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state
    }

    fn advance(&mut self, next: RequestState) {
        tracing::debug!(
            request = %self.directory.display(),
            from = ?self.state,
            to = ?next,
            "request state"
        );
        self.state = next;
    }

    /// Serves the request and closes the connect pipe.
    ///
    /// # Errors
    /// Returns an error only if the connect pipe itself fails; every
    /// problem with the request is answered and reported as
    /// [`Served::Rejected`].
    pub fn serve(mut self) -> Result<Served> {
        self.advance(RequestState::ReadingRequest);
        let mut connect = FilePipe::open(&self.directory, Role::Yang)?;
        connect.set_cleanup_on_close(true);

        let outcome = self.negotiate(&mut connect);

        self.advance(RequestState::SendingResponse);
        let (response, served) = match outcome {
            Ok((response, pipe)) => (response, Served::Created(pipe)),
            Err(rejection) => (
                Response::new(rejection.status, rejection.message.as_str()),
                Served::Rejected {
                    status: rejection.status,
                    message: rejection.message,
                },
            ),
        };

        let sent = connect
            .writer()
            .and_then(|mut writer| writer.write_all_blocking(&response.encode()));
        let closed = connect.close();
        self.advance(RequestState::Done);

        if let Err(e) = sent.and(closed) {
            if let Served::Created(mut pipe) = served {
                pipe.set_cleanup_on_close(true);
                drop(pipe.close());
                remove_location(pipe.location())?;
            }
            return Err(e);
        }
        Ok(served)
    }

    fn negotiate(
        &mut self,
        connect: &mut FilePipe,
    ) -> std::result::Result<(Response, AnyPipe), Rejection> {
        let raw = self.read_request(connect)?;

        self.advance(RequestState::ParsingRequest);
        let request = Request::decode(&raw)
            .map_err(|e| Rejection::new(Status::BadRequest, e.to_string()))?;

        self.advance(RequestState::SelectingType);
        let accepted = request.accept_types();
        let pipe_type = negotiate(&self.config.supported, &accepted)
            .map_err(|e| Rejection::new(Status::InternalError, e.to_string()))?;

        self.advance(RequestState::CreatingPipe);
        self.create_pipe(pipe_type).map_err(|e| {
            Rejection::new(Status::InternalError, format!("cannot create pipe: {e}"))
        })
    }

    fn read_request(&self, connect: &mut FilePipe) -> std::result::Result<Vec<u8>, Rejection> {
        let poller = Poller::new(self.config.request_poll())
            .with_cancellation(self.cancel.clone());
        let result = connect
            .source()
            .and_then(|source| {
                ChannelReader::with_poller(source, poller).read_to_end_blocking()
            });
        result.map_err(|e| match e {
            Error::Timeout { .. } => {
                Rejection::new(Status::BadRequest, "timed out reading request")
            }
            Error::Cancelled => Rejection::new(Status::InternalError, "server is shutting down"),
            other => Rejection::new(Status::BadRequest, other.to_string()),
        })
    }

    fn create_pipe(&self, pipe_type: PipeType) -> Result<(Response, AnyPipe)> {
        let name = uuid::Uuid::new_v4().to_string();
        let location = if pipe_type.is_single_file() {
            self.config
                .pipe_dir
                .join(format!("{name}.{SHARED_MEMORY_EXTENSION}"))
        } else {
            self.config.pipe_dir.join(name)
        };
        let spec = PipeSpec {
            pipe_type,
            role: Role::Yang,
            location,
            size: pipe_type
                .is_single_file()
                .then_some(self.config.shared_memory_size),
        };

        let params = spec.peer().to_params()?;
        let pipe = match spec.open() {
            Ok(pipe) => pipe.with_poller(Poller::new(self.config.pipe_poll())),
            Err(e) => {
                drop(remove_location(&spec.location));
                return Err(e);
            }
        };
        tracing::debug!(location = %spec.location.display(), %pipe_type, "created pipe");
        Ok((Response::pipe_created(params), pipe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ServerBuilder;
    use dirpipe_channel::{Channel, WritableChannel};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Writes a request the way a client does, optionally leaving its sink
    /// open.
    fn post(connect_dir: &Path, name: &str, text: &[u8], finish: bool) -> FilePipe {
        let mut client = FilePipe::open(&connect_dir.join(name), Role::Yin).unwrap();
        client.sink().unwrap().write(text).unwrap();
        if finish {
            client.sink().unwrap().close().unwrap();
        }
        client
    }

    fn answer(client: &mut FilePipe) -> Response {
        let raw = client.reader().unwrap().read_to_end_blocking().unwrap();
        Response::decode(&raw).unwrap()
    }

    #[test]
    fn test_pending_requests_skip_claimed_and_hidden() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("b")).unwrap();
        fs::create_dir_all(root.path().join("a")).unwrap();
        fs::create_dir_all(root.path().join(".pipes")).unwrap();
        fs::write(root.path().join("stray.txt"), b"x").unwrap();

        assert_eq!(
            pending_requests(root.path()).unwrap(),
            vec![root.path().join("a"), root.path().join("b")]
        );
        assert!(claim(&root.path().join("a")).unwrap());
        assert!(!claim(&root.path().join("a")).unwrap());
        assert!(!claim(&root.path().join("gone")).unwrap());
        assert_eq!(pending_requests(root.path()).unwrap(), vec![root.path().join("b")]);
    }

    #[test]
    fn test_serve_creates_requested_pipe() {
        let root = tempdir().unwrap();
        let (server, _handle) = ServerBuilder::new(root.path())
            .supported_types([PipeType::File, PipeType::ChunkFile])
            .build()
            .unwrap();
        let mut client = post(
            root.path(),
            "req",
            b"CONNECT DIRPIPE/1.0\naccept-types: ChunkFilePipe\n",
            true,
        );

        let request_dir = root.path().join("req");
        let served = RequestSession::new(&request_dir, server.config(), CancellationToken::new())
            .serve()
            .unwrap();
        let Served::Created(pipe) = served else {
            panic!("request was rejected");
        };
        assert_eq!(pipe.pipe_type(), PipeType::ChunkFile);
        assert_eq!(pipe.role(), Role::Yang);

        let response = answer(&mut client);
        assert_eq!(response.status, Status::PipeCreated);
        let spec = PipeSpec::from_params(&response.params).unwrap();
        assert_eq!(spec.role, Role::Yin);
        assert_eq!(spec.location, pipe.location());
        assert!(spec.location.starts_with(root.path().join(".pipes")));
    }

    #[test]
    fn test_malformed_request_gets_bad_request() {
        let root = tempdir().unwrap();
        let (server, _handle) = ServerBuilder::new(root.path()).build().unwrap();
        let mut client = post(root.path(), "req", b"HELLO DIRPIPE/1.0\n", true);

        let request_dir = root.path().join("req");
        let served = RequestSession::new(&request_dir, server.config(), CancellationToken::new())
            .serve()
            .unwrap();
        assert!(matches!(served, Served::Rejected { status: Status::BadRequest, .. }));
        assert_eq!(answer(&mut client).status, Status::BadRequest);
    }

    #[test]
    fn test_unsupported_types_get_internal_error() {
        let root = tempdir().unwrap();
        let (server, _handle) = ServerBuilder::new(root.path())
            .supported_types([PipeType::SharedMemory])
            .build()
            .unwrap();
        let mut client = post(
            root.path(),
            "req",
            b"CONNECT DIRPIPE/1.0\naccept-types: FilePipe\n",
            true,
        );

        let request_dir = root.path().join("req");
        let served = RequestSession::new(&request_dir, server.config(), CancellationToken::new())
            .serve()
            .unwrap();
        assert!(matches!(served, Served::Rejected { status: Status::InternalError, .. }));
        let response = answer(&mut client);
        assert_eq!(response.status, Status::InternalError);
        assert!(response.message.contains("FilePipe"));
    }

    #[test]
    fn test_silent_client_times_out() {
        let root = tempdir().unwrap();
        let (server, _handle) = ServerBuilder::new(root.path())
            .request_timeout(Duration::from_millis(50))
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        let mut client = post(root.path(), "req", b"CONNECT DIRPIPE/1.0\n", false);

        let request_dir = root.path().join("req");
        let session = RequestSession::new(&request_dir, server.config(), CancellationToken::new());
        assert_eq!(session.state(), RequestState::WaitingForDirectory);
        let served = session.serve().unwrap();
        match served {
            Served::Rejected { status, message } => {
                assert_eq!(status, Status::BadRequest);
                assert!(message.contains("timed out"));
            }
            Served::Created(_) => panic!("request without EOF was served"),
        }
        assert_eq!(answer(&mut client).status, Status::BadRequest);
    }
}
