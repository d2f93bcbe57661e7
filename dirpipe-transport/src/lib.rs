//! # dirpipe Transport
//!
//! Bidirectional pipes over the filesystem.
//!
//! This crate provides:
//! - [`pipe`] - The [`Pipe`] end and its [`PipeBackend`] seam
//! - [`backend`] - Shared memory, plain file and chunk file backends
//! - [`kind`] - Pipe type names and negotiation
//! - [`any`] - [`AnyPipe`] and the [`PipeSpec`] exchanged during connect

pub mod any;
pub mod backend;
pub mod kind;
pub mod pipe;

pub use any::{AnyPipe, PipeSpec};
pub use backend::shm::DEFAULT_SHARED_MEMORY_SIZE;
pub use backend::{
    ChunkFileBackend, ChunkFilePipe, FileBackend, FilePipe, SharedMemoryBackend,
    SharedMemoryPipe, remove_location,
};
pub use kind::{PipeType, negotiate};
pub use pipe::{Pipe, PipeBackend};
