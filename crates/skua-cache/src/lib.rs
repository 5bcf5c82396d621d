//! A file-backed cache of fetched archives, shared across resolver runs and
//! across processes.
//!
//! Entries are keyed by `{name}/{version}/{filename}` and immutable once
//! present; there is no TTL. Writers stage content under a temporary name
//! and rename it into place, so a reader observes either no file or the
//! complete file. Cross-process exclusion uses a file lock next to the
//! entry.

use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_err as fs;
use tempfile::{tempdir, NamedTempFile, TempDir};

pub use lock::FileLock;

mod lock;

/// A cache entry which may or may not exist yet.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The directory the entry lives in.
    pub dir: PathBuf,
    /// The filename of the entry.
    pub file: String,
}

impl CacheEntry {
    /// The full path of the entry.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }

    /// The path of the lock file guarding writes to this entry.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.lock", self.file))
    }

    /// Whether the (complete) entry is already present.
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }
}

/// The main cache abstraction.
#[derive(Debug, Clone)]
pub struct Cache {
    /// The cache directory.
    root: PathBuf,
    /// A temporary cache directory, kept alive for the length of the run
    /// when the caller asked for an ephemeral cache.
    _temp_dir_drop: Option<Arc<TempDir>>,
}

impl Cache {
    /// A persistent cache directory at `root`.
    pub fn from_path(root: impl Into<PathBuf>) -> Result<Self, io::Error> {
        Ok(Self {
            root: Self::init(root.into())?,
            _temp_dir_drop: None,
        })
    }

    /// The default per-user cache directory.
    pub fn from_user_dir() -> Result<Self, io::Error> {
        let root = directories::ProjectDirs::from("", "", "skua")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "No user cache directory found")
            })?;
        Self::from_path(root)
    }

    /// An ephemeral cache, removed when the last handle drops.
    pub fn temp() -> Result<Self, io::Error> {
        let temp_dir = tempdir()?;
        Ok(Self {
            root: Self::init(temp_dir.path().to_path_buf())?,
            _temp_dir_drop: Some(Arc::new(temp_dir)),
        })
    }

    /// Return the root of the cache.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entry for an artifact, keyed `{name}/{version}/{filename}`.
    pub fn archive_entry(&self, name: &str, version: &str, filename: &str) -> CacheEntry {
        CacheEntry {
            dir: self.root.join("archives-v0").join(name).join(version),
            file: filename.to_string(),
        }
    }

    /// Acquire the cross-process lock for an entry, creating its directory
    /// first. Blocks until the lock is free; released on drop.
    pub fn lock_entry(&self, entry: &CacheEntry) -> Result<FileLock, io::Error> {
        fs::create_dir_all(&entry.dir)?;
        FileLock::acquire(entry.lock_path())
    }

    /// Atomically publish `content` as the entry's file. The content lands
    /// under a temporary name and is renamed into place, so concurrent
    /// readers never see a partial file.
    pub fn write_atomic(&self, entry: &CacheEntry, content: &[u8]) -> Result<PathBuf, io::Error> {
        fs::create_dir_all(&entry.dir)?;
        let mut temp_file = NamedTempFile::new_in(&entry.dir)?;
        temp_file.write_all(content)?;
        let path = entry.path();
        temp_file
            .persist(&path)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        Ok(path)
    }

    /// A staging file in the entry's directory, for streaming downloads.
    /// Persist it with [`NamedTempFile::persist`] onto [`CacheEntry::path`].
    pub fn staging_file(&self, entry: &CacheEntry) -> Result<NamedTempFile, io::Error> {
        fs::create_dir_all(&entry.dir)?;
        NamedTempFile::new_in(&entry.dir)
    }

    /// Initialize a directory for use as a cache.
    fn init(root: PathBuf) -> Result<PathBuf, io::Error> {
        // Create the cache directory, if it doesn't exist.
        fs::create_dir_all(&root)?;

        // Add the CACHEDIR.TAG.
        cachedir::ensure_tag(&root)?;

        // Add the .gitignore.
        let gitignore_path = root.join(".gitignore");
        if !gitignore_path.exists() {
            let mut file = fs::File::create(gitignore_path)?;
            file.write_all(b"*")?;
        }

        fs::canonicalize(root)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::Cache;

    #[test]
    fn entry_layout() {
        let cache = Cache::temp().unwrap();
        let entry = cache.archive_entry("flask", "2.1.2", "flask-2.1.2-py3-none-any.whl");
        assert!(entry
            .path()
            .ends_with("archives-v0/flask/2.1.2/flask-2.1.2-py3-none-any.whl"));
        assert!(!entry.exists());
    }

    #[test]
    fn atomic_write_then_read() {
        let cache = Cache::temp().unwrap();
        let entry = cache.archive_entry("flask", "2.1.2", "flask-2.1.2.tar.gz");
        cache.write_atomic(&entry, b"archive-bytes").unwrap();
        assert!(entry.exists());
        assert_eq!(fs_err::read(entry.path()).unwrap(), b"archive-bytes");
    }

    #[test]
    fn init_marks_directory() {
        let cache = Cache::temp().unwrap();
        assert!(cache.root().join("CACHEDIR.TAG").is_file());
        assert!(cache.root().join(".gitignore").is_file());
    }

    /// Two concurrent fetchers of the same entry: both observe the complete
    /// file, and only one performs the "download".
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_single_download() {
        let cache = Arc::new(Cache::temp().unwrap());
        let downloads = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let downloads = Arc::clone(&downloads);
            tasks.push(tokio::task::spawn_blocking(move || {
                let entry = cache.archive_entry("a", "1.0", "a-1.0.tar.gz");
                let _lock = cache.lock_entry(&entry).unwrap();
                if !entry.exists() {
                    downloads.fetch_add(1, Ordering::SeqCst);
                    cache.write_atomic(&entry, b"payload").unwrap();
                }
                fs_err::read(entry.path()).unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), b"payload");
        }
        assert_eq!(downloads.load(Ordering::SeqCst), 1);
    }
}
