//! # dirpipe Server
//!
//! Server side of the dirpipe connect protocol.
//!
//! This crate provides:
//! - Server builder with configuration options
//! - The request-serving state machine
//! - Pipe handler trait for [`Server::run`]
//! - Active host election among several candidate servers (unix)

pub mod builder;
pub mod error;
pub mod handler;
#[cfg(unix)]
pub mod host;
pub mod request;

pub use builder::{Server, ServerBuilder, ServerConfig, ServerHandle};
pub use error::ServerError;
pub use handler::PipeHandler;
#[cfg(unix)]
pub use host::{Acquire, ActiveHost};
pub use request::{RequestSession, RequestState, Served};

#[cfg(test)]
mod tests {
    use super::*;
    use dirpipe_client::{Client, ClientError, Connection};
    use dirpipe_core::Status;
    use dirpipe_transport::{AnyPipe, PipeType};
    use std::io::{Read, Write};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    const POLL: Duration = Duration::from_millis(5);

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn server(connect_dir: &Path) -> ServerBuilder {
        Server::builder(connect_dir)
            .poll_interval(POLL)
            .accept_timeout(Some(Duration::from_secs(10)))
    }

    fn client(connect_dir: &Path) -> dirpipe_client::ClientBuilder {
        Client::builder(connect_dir)
            .poll_interval(POLL)
            .timeout(Some(Duration::from_secs(10)))
    }

    /// Serves pending requests until one has been answered.
    fn serve_until_answered(server: &Server) -> Served {
        loop {
            if let Some(served) = server.serve_pending().unwrap().pop() {
                return served;
            }
            thread::sleep(POLL);
        }
    }

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_chunk_file_pipe_end_to_end() {
        init_tracing();
        let root = tempdir().unwrap();
        let (server, _handle) = server(root.path())
            .supported_types([PipeType::ChunkFile, PipeType::File, PipeType::SharedMemory])
            .build()
            .unwrap();

        let acceptor = thread::spawn(move || {
            let mut pipe = server.accept().unwrap();
            pipe.set_cleanup_on_close(true);
            pipe.writer().unwrap().write_all(b"Hello\n").unwrap();
            pipe.close().unwrap();
            pipe.location().to_path_buf()
        });

        let mut pipe = client(root.path())
            .accept_types([PipeType::ChunkFile])
            .build()
            .connect()
            .unwrap();
        assert_eq!(pipe.pipe_type(), PipeType::ChunkFile);
        let mut text = String::new();
        pipe.reader().unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "Hello\n");

        let location = acceptor.join().unwrap();
        assert_eq!(location, pipe.location());
        assert!(location.exists());
        pipe.set_cleanup_on_close(true);
        pipe.close().unwrap();
        assert!(!location.exists());
        assert_eq!(entries(root.path()), vec![".pipes".to_string()]);
    }

    #[test]
    fn test_shared_memory_is_preferred_by_default() {
        init_tracing();
        let root = tempdir().unwrap();
        let (server, _handle) = server(root.path()).shared_memory_size(1024).build().unwrap();

        let acceptor = thread::spawn(move || {
            let mut pipe = server.accept().unwrap();
            let mut request = [0u8; 4];
            pipe.reader().unwrap().read_exact(&mut request).unwrap();
            assert_eq!(&request, b"ping");
            pipe.writer().unwrap().write_all(b"pong").unwrap();
            pipe.set_cleanup_on_close(true);
            pipe.close().unwrap();
        });

        let address = format!("dirpipe://{}", root.path().display());
        let mut conn = Connection::open(&address).unwrap();
        assert_eq!(conn.pipe().pipe_type(), PipeType::SharedMemory);
        assert_eq!(conn.pipe().spec().size, Some(1024));
        conn.write_all(b"ping").unwrap();
        let mut reply = String::new();
        conn.read_to_string(&mut reply).unwrap();
        assert_eq!(reply, "pong");

        acceptor.join().unwrap();
        let location = conn.pipe().location().to_path_buf();
        conn.close().unwrap();
        assert!(!location.exists());
    }

    #[test]
    fn test_unsupported_accept_list_is_rejected() {
        init_tracing();
        let root = tempdir().unwrap();
        let (server, _handle) = server(root.path())
            .supported_types([PipeType::SharedMemory, PipeType::File])
            .build()
            .unwrap();
        let serving = thread::spawn(move || serve_until_answered(&server));

        let err = client(root.path())
            .accept_types([PipeType::ChunkFile])
            .build()
            .connect()
            .unwrap_err();
        match err {
            ClientError::Rejected { status, .. } => assert_eq!(status, Status::InternalError),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            serving.join().unwrap(),
            Served::Rejected { status: Status::InternalError, .. }
        ));
    }

    #[test]
    fn test_request_is_served_by_exactly_one_server() {
        init_tracing();
        let root = tempdir().unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let servers: Vec<_> = (0..2)
            .map(|_| {
                let (server, _handle) = server(root.path()).build().unwrap();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut pipes: Vec<AnyPipe> = Vec::new();
                    while !done.load(Ordering::Acquire) {
                        for served in server.serve_pending().unwrap() {
                            if let Served::Created(pipe) = served {
                                pipes.push(pipe);
                            }
                        }
                        thread::sleep(POLL);
                    }
                    pipes.len()
                })
            })
            .collect();

        let pipe = client(root.path()).build().connect().unwrap();
        done.store(true, Ordering::Release);
        let total: usize = servers.into_iter().map(|s| s.join().unwrap()).sum();
        assert_eq!(total, 1);
        drop(pipe);
    }

    #[test]
    fn test_run_until_shutdown() {
        init_tracing();
        let root = tempdir().unwrap();
        let (server, handle) = server(root.path()).build().unwrap();
        let (tx, rx) = mpsc::channel();

        let running = thread::spawn(move || {
            let mut handler = |pipe: AnyPipe| tx.send(pipe).unwrap();
            server.run(&mut handler)
        });

        let connector = client(root.path()).accept_types([PipeType::File]).build();
        let mut pipes = Vec::new();
        for _ in 0..2 {
            let mut ours = connector.connect().unwrap();
            let mut theirs: AnyPipe = rx.recv_timeout(Duration::from_secs(10)).unwrap();
            ours.writer().unwrap().write_all(b"x").unwrap();
            let mut byte = [0u8; 1];
            theirs.reader().unwrap().read_exact(&mut byte).unwrap();
            assert_eq!(&byte, b"x");
            pipes.push((ours, theirs));
        }

        handle.shutdown();
        assert!(handle.is_shutdown());
        running.join().unwrap().unwrap();
    }
}
