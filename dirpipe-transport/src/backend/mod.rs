//! Storage backends for [`Pipe`](crate::Pipe).
//!
//! Provides the three pipe transports over the filesystem.

pub mod chunk;
pub mod file;
pub mod shm;

pub use chunk::{ChunkFileBackend, ChunkFilePipe};
pub use file::{FileBackend, FilePipe};
pub use shm::{SharedMemoryBackend, SharedMemoryPipe};

use dirpipe_core::{Error, Result};
use std::io::ErrorKind;
use std::path::Path;

/// Removes a shared-memory file or a pipe directory, treating an already
/// missing one as success.
///
/// # Errors
/// Returns IO error if removal fails.
pub fn remove_location(path: &Path) -> Result<()> {
    if path.is_dir() {
        return remove_dir_all_if_exists(path);
    }
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

/// Removes a directory tree, treating an already missing one as success.
pub(crate) fn remove_dir_all_if_exists(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_remove_location() {
        let root = tempdir().unwrap();
        let file = root.path().join("pipe.shm");
        let dir = root.path().join("pipe");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(dir.join("yinToYang")).unwrap();

        remove_location(&file).unwrap();
        remove_location(&dir).unwrap();
        remove_location(&dir).unwrap();
        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
