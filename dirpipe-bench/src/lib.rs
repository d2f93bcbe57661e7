//! # dirpipe Bench
//!
//! Helpers shared by the dirpipe benchmarks.

pub mod throughput;

pub use throughput::{TransferStats, pipe_pair, test_payload, transfer};
