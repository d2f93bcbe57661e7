//! Electing one active server among several candidates.
//!
//! Candidates share a parent directory. The winner holds an exclusive
//! `flock` on `<parent>/.host`, creates a fresh connect directory and writes
//! its path into the lock file, where losers read it back.

use crate::error::ServerError;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Lock file inside the parent directory.
pub const HOST_LOCK_FILE: &str = ".host";

/// Result of an election attempt.
#[derive(Debug)]
pub enum Acquire {
    /// This process is the active host.
    Acquired(ActiveHost),
    /// Another process is; requests go to its connect directory.
    AlreadyActive {
        /// Connect directory of the active host.
        host: PathBuf,
    },
}

/// The elected host. Dropping it releases the lock but keeps the connect
/// directory; [`release`](Self::release) removes both.
#[derive(Debug)]
pub struct ActiveHost {
    lock: Flock<File>,
    connect_dir: PathBuf,
}

impl ActiveHost {
    /// Tries to become the active host under `parent`.
    ///
    /// # Errors
    /// Returns IO error if the lock file or connect directory cannot be
    /// created, or if locking fails for a reason other than contention.
    pub fn try_acquire(parent: &Path) -> Result<Acquire, ServerError> {
        fs::create_dir_all(parent)?;
        let lock_path = parent.join(HOST_LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                let host = read_record(&lock_path)?;
                tracing::debug!(host = %host.display(), "another host is active");
                return Ok(Acquire::AlreadyActive { host });
            }
            Err((_, errno)) => return Err(std::io::Error::from(errno).into()),
        };

        let connect_dir = parent.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&connect_dir)?;
        write_record(&mut lock, connect_dir.to_string_lossy().as_bytes())?;
        tracing::info!(connect = %connect_dir.display(), "became active host");

        Ok(Acquire::Acquired(Self { lock, connect_dir }))
    }

    /// Connect directory clients should use.
    #[must_use]
    pub fn connect_directory(&self) -> &Path {
        &self.connect_dir
    }

    /// Clears the record, removes the connect directory and unlocks.
    ///
    /// # Errors
    /// Returns IO error if the record or directory cannot be removed.
    pub fn release(mut self) -> Result<(), ServerError> {
        write_record(&mut self.lock, b"")?;
        match fs::remove_dir_all(&self.connect_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(connect = %self.connect_dir.display(), "released host");
        Ok(())
    }
}

fn write_record(file: &mut File, record: &[u8]) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(record)?;
    file.sync_data()
}

fn read_record(path: &Path) -> std::io::Result<PathBuf> {
    let mut record = String::new();
    File::open(path)?.read_to_string(&mut record)?;
    Ok(PathBuf::from(record.trim_end()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn acquired(result: Acquire) -> ActiveHost {
        match result {
            Acquire::Acquired(host) => host,
            Acquire::AlreadyActive { host } => panic!("{} is already active", host.display()),
        }
    }

    #[test]
    fn test_second_candidate_sees_active_host() {
        let parent = tempdir().unwrap();
        let host = acquired(ActiveHost::try_acquire(parent.path()).unwrap());
        assert!(host.connect_directory().is_dir());
        assert!(host.connect_directory().starts_with(parent.path()));

        match ActiveHost::try_acquire(parent.path()).unwrap() {
            Acquire::AlreadyActive { host: path } => assert_eq!(path, host.connect_directory()),
            Acquire::Acquired(_) => panic!("two active hosts"),
        }
    }

    #[test]
    fn test_release_hands_over() {
        let parent = tempdir().unwrap();
        let first = acquired(ActiveHost::try_acquire(parent.path()).unwrap());
        let first_dir = first.connect_directory().to_path_buf();
        first.release().unwrap();
        assert!(!first_dir.exists());

        let second = acquired(ActiveHost::try_acquire(parent.path()).unwrap());
        assert_ne!(second.connect_directory(), first_dir);
    }

    #[test]
    fn test_drop_unlocks() {
        let parent = tempdir().unwrap();
        drop(acquired(ActiveHost::try_acquire(parent.path()).unwrap()));
        acquired(ActiveHost::try_acquire(parent.path()).unwrap());
    }
}
