//! Blob storage used for offline persistence of sessions and unsent events.
//!
//! The core only needs `get`/`set`/`remove` on opaque byte blobs. Two
//! implementations ship with the crate: an in-memory map and a directory of
//! files guarded by an exclusive lock file.
//!
//! # Example
//!
//! ```no_run
//! use customfit::storage::{FileStorage, Storage};
//!
//! let storage = FileStorage::new("/var/lib/myapp/customfit").unwrap();
//! storage.set("cf_current_session", b"{}").unwrap();
//! assert!(storage.get("cf_current_session").unwrap().is_some());
//! ```

use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{CFError, ErrorCode, Result};

/// Storage key for the persisted current session.
pub const SESSION_STORAGE_KEY: &str = "cf_current_session";

/// Storage key for events that could not be delivered before shutdown.
pub const PENDING_EVENTS_STORAGE_KEY: &str = "cf_pending_events";

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// File-backed storage: one file per key inside a directory.
///
/// Writes go to a temporary file which is synced and renamed over the
/// target, all while holding an exclusive lock on `customfit.lock`, so a
/// reader in another process never sees a half-written blob.
pub struct FileStorage {
    root: PathBuf,
    lock_file_path: PathBuf,
}

impl FileStorage {
    /// Create a file storage rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            CFError::with_source(
                ErrorCode::StorageWriteError,
                format!("Failed to create storage directory: {}", root.display()),
                e,
            )
        })?;

        let lock_file_path = root.join("customfit.lock");
        Ok(Self {
            root,
            lock_file_path,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.blob", file_name))
    }

    fn acquire_lock(&self) -> Result<File> {
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file_path)
            .map_err(|e| {
                CFError::with_source(ErrorCode::StorageWriteError, "Failed to open lock file", e)
            })?;

        lock_file.lock_exclusive().map_err(|e| {
            CFError::with_source(ErrorCode::StorageWriteError, "Failed to acquire storage lock", e)
        })?;

        Ok(lock_file)
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let lock = self.acquire_lock()?;
        let result = match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(CFError::with_source(
                ErrorCode::StorageReadError,
                format!("Failed to read storage key '{}'", key),
                e,
            )),
        };
        let _ = lock.unlock();
        result
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let lock = self.acquire_lock()?;
        let target = self.path_for(key);
        let temp = target.with_extension("tmp");

        let write = || -> std::io::Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp, &target)
        };

        let result = write().map_err(|e| {
            CFError::with_source(
                ErrorCode::StorageWriteError,
                format!("Failed to write storage key '{}'", key),
                e,
            )
        });
        let _ = lock.unlock();

        tracing::debug!("Stored {} bytes under {}", value.len(), key);
        result
    }

    fn remove(&self, key: &str) -> Result<()> {
        let lock = self.acquire_lock()?;
        let result = match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(CFError::with_source(
                ErrorCode::StorageWriteError,
                format!("Failed to remove storage key '{}'", key),
                e,
            )),
        };
        let _ = lock.unlock();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_roundtrip() {
        let storage = InMemoryStorage::new();
        assert!(storage.get("k").unwrap().is_none());

        storage.set("k", b"v").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(storage.len(), 1);

        storage.remove("k").unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_key_is_sanitized() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let path = storage.path_for("../escape/key");
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
