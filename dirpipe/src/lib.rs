//! # dirpipe
//!
//! Interprocess pipes whose two processes find each other through a shared
//! directory.
//!
//! A server watches a connect directory. A client drops a request into it,
//! the two negotiate a transport, and each side ends up with one end of a
//! duplex pipe.
//!
//! ## Features
//!
//! - **Three transports** - Shared memory ring buffers, a plain growing file
//!   per direction, or a directory of chunk files per direction
//! - **No daemon** - Only the filesystem is shared; there are no sockets
//! - **Blocking streams** - `std::io::Read`/`Write` with timeouts and
//!   cancellation
//! - **Cleanup** - Backing files disappear once both ends have closed
//!
//! ## Quick Start
//!
//! ```no_run
//! use dirpipe::prelude::*;
//! use std::io::{Read, Write};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Server process
//! let (server, _handle) = ServerBuilder::new("/run/my-service").build()?;
//! let mut pipe = server.accept()?;
//! pipe.writer()?.write_all(b"Hello\n")?;
//! pipe.close()?;
//!
//! // Client process
//! let mut conn = Connection::open("dirpipe:///run/my-service")?;
//! let mut greeting = String::new();
//! conn.read_to_string(&mut greeting)?;
//! conn.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Ring buffer, protocol messages, roles, polling, errors
//! - [`channel`] - One-directional channels and blocking adapters
//! - [`transport`] - Pipes pairing two channels
//! - [`server`] - Serving connect requests
//! - [`client`] - Requesting pipes

pub mod prelude;

/// Ring buffer, protocol messages, roles, polling and errors.
pub mod core {
    pub use dirpipe_core::*;
}

/// One-directional channels.
pub mod channel {
    pub use dirpipe_channel::*;
}

/// Pipes and transport selection.
pub mod transport {
    pub use dirpipe_transport::*;
}

/// Server side of the connect protocol.
pub mod server {
    pub use dirpipe_server::*;
}

/// Client side of the connect protocol.
pub mod client {
    pub use dirpipe_client::*;
}
