//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and traits.
//!
//! ```
//! use dirpipe::prelude::*;
//! ```

// Core types
pub use dirpipe_core::error::{Error as CoreError, Result as CoreResult};
pub use dirpipe_core::{CancellationToken, PollConfig, Poller, Role};

// Channel types
pub use dirpipe_channel::{
    Channel, ChannelReader, ChannelState, ChannelWriter, ReadOutcome, ReadableChannel,
    WritableChannel,
};

// Transport types
pub use dirpipe_transport::{
    AnyPipe, ChunkFilePipe, FilePipe, PipeSpec, PipeType, SharedMemoryPipe,
};

// Server types
pub use dirpipe_server::{PipeHandler, Server, ServerBuilder, ServerError, ServerHandle};

// Client types
pub use dirpipe_client::{Client, ClientBuilder, ClientError, Connection};
