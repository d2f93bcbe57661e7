//! # dirpipe Core
//!
//! Core types shared by every dirpipe layer.
//!
//! This crate provides:
//! - [`queue`] - Byte ring buffer living in a shared memory region
//! - [`message`] - Text request/response messages of the connect protocol
//! - [`role`] - The two-valued tag distinguishing pipe ends
//! - [`wait`] - Polling with deadlines and cancellation
//! - [`error`] - Error types shared by all layers

pub mod error;
pub mod message;
pub mod queue;
pub mod role;
pub mod wait;

pub use error::{Error, Result};
pub use message::{Command, Parameters, Request, Response, Status};
pub use queue::RingBufferQueue;
pub use role::Role;
pub use wait::{CancellationToken, Clock, PollConfig, Poller, SystemClock};
