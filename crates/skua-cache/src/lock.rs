use std::fs::{File, OpenOptions};
use std::io;
use std::path::PathBuf;

use fs2::FileExt;
use tracing::warn;

/// An advisory exclusive lock on a cache entry's `.lock` file.
///
/// A writer holds this while staging a download, so per artifact exactly
/// one process fetches and the rest block until the complete entry is in
/// place. The lock is released when the guard drops; if the process dies
/// instead, the OS releases it with the file descriptor, so a stale lock
/// file can never wedge the cache.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock at `path` is ours, creating the lock
    /// file if needed.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.lock_exclusive()?;
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Unlocking eagerly keeps the hand-off to waiting processes
        // prompt; on failure the descriptor going away does the same job.
        if let Err(err) = self.file.unlock() {
            warn!("Could not release {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FileLock;

    #[test]
    fn sequential_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".a-1.0.tar.gz.lock");
        let first = FileLock::acquire(&path).unwrap();
        drop(first);
        let _second = FileLock::acquire(&path).unwrap();
    }
}
