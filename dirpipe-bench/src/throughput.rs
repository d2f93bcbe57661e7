//! Moving bytes through a pipe inside one thread.
//!
//! Channels never block, so a single thread can alternate between writing
//! into one end and draining the other. This measures the transport itself
//! without any poll interval in the way.

use dirpipe_channel::ReadOutcome;
use dirpipe_core::{Error, Result, Role};
use dirpipe_transport::{AnyPipe, PipeSpec, PipeType};
use std::path::Path;
use std::time::{Duration, Instant};

/// Result of one transfer.
#[derive(Debug, Clone, Copy)]
pub struct TransferStats {
    /// Bytes delivered to the reading end.
    pub bytes: u64,
    /// Wall time of the transfer.
    pub duration: Duration,
}

impl TransferStats {
    /// Returns bytes per second.
    #[must_use]
    pub fn bytes_per_second(&self) -> f64 {
        self.bytes as f64 / self.duration.as_secs_f64()
    }

    /// Returns megabytes per second.
    #[must_use]
    pub fn mb_per_second(&self) -> f64 {
        self.bytes_per_second() / (1024.0 * 1024.0)
    }
}

/// Opens both ends of a fresh pipe of `pipe_type` under `dir`.
///
/// Returns `(yin, yang)`. `size` is only used for shared memory.
///
/// # Errors
/// Returns an error if the backing storage cannot be created.
pub fn pipe_pair(pipe_type: PipeType, dir: &Path, size: usize) -> Result<(AnyPipe, AnyPipe)> {
    let spec = PipeSpec {
        pipe_type,
        role: Role::Yin,
        location: dir.join(pipe_type.name()),
        size: pipe_type.is_single_file().then_some(size),
    };
    Ok((spec.open()?, spec.peer().open()?))
}

/// Deterministic payload of `len` bytes.
#[must_use]
pub fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Writes `data` into `from` in pieces of at most `chunk` bytes while
/// draining `to`, until every byte has arrived.
///
/// # Errors
/// Returns an error if a channel fails, or a state error if the reader
/// sees EOF early.
pub fn transfer(
    from: &mut AnyPipe,
    to: &mut AnyPipe,
    data: &[u8],
    chunk: usize,
) -> Result<TransferStats> {
    let mut buf = vec![0u8; chunk.max(1)];
    let mut sent = 0;
    let mut received = 0;
    let start = Instant::now();

    while received < data.len() {
        if sent < data.len() {
            let end = (sent + chunk).min(data.len());
            sent += from.sink()?.write(&data[sent..end])?;
        }
        match to.source()?.read(&mut buf)? {
            ReadOutcome::Data(n) => received += n,
            ReadOutcome::Pending => {}
            ReadOutcome::Eof => {
                return Err(Error::state(format!(
                    "EOF after {received} of {} bytes",
                    data.len()
                )));
            }
        }
    }

    Ok(TransferStats {
        bytes: received as u64,
        duration: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_transfer_every_pipe_type() {
        let root = tempdir().unwrap();
        let data = test_payload(5000);
        for pipe_type in PipeType::ALL {
            let (mut yin, mut yang) = pipe_pair(pipe_type, root.path(), 1024).unwrap();
            let stats = transfer(&mut yin, &mut yang, &data, 300).unwrap();
            assert_eq!(stats.bytes, 5000, "{pipe_type}");
        }
    }

    #[test]
    fn test_transfer_stats_rates() {
        let stats = TransferStats {
            bytes: 2 * 1024 * 1024,
            duration: Duration::from_secs(2),
        };
        assert!((stats.bytes_per_second() - 1_048_576.0).abs() < 0.001);
        assert!((stats.mb_per_second() - 1.0).abs() < 0.001);
    }
}
