//! # dirpipe Client
//!
//! Client side of the dirpipe connect protocol.
//!
//! This crate provides:
//! - [`ClientBuilder`] / [`Client`] - Posting a connect request and opening
//!   the negotiated pipe
//! - [`Connection`] - The negotiated pipe as a duplex `Read + Write` stream
//!
//! ```no_run
//! use dirpipe_client::Connection;
//! use std::io::Write;
//!
//! let mut conn = Connection::open("dirpipe:///run/my-service")?;
//! conn.write_all(b"Hello\n")?;
//! conn.close()?;
//! # Ok::<(), dirpipe_client::ClientError>(())
//! ```

pub mod builder;
pub mod connection;
pub mod error;

pub use builder::{Client, ClientBuilder};
pub use connection::{Connection, parse_address};
pub use error::ClientError;
