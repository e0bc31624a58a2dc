//! Key-value persistence for the membership ledger.
//!
//! Defines the [`LedgerStorage`] trait plus two implementations:
//! - [`InMemoryStorage`]: map-backed, with write-failure injection for tests
//! - [`FileStorage`]: one file per key under a data directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Keys written by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Cached identity record.
    User,
    /// Known teams.
    Teams,
    /// Membership relation.
    Memberships,
    /// Selected team ID.
    CurrentTeam,
}

impl StorageKey {
    /// Every key, in the order they are cleared.
    pub const ALL: [Self; 4] = [Self::User, Self::Teams, Self::Memberships, Self::CurrentTeam];

    /// The persisted key name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "tm:user",
            Self::Teams => "tm:teams",
            Self::Memberships => "tm:memberships",
            Self::CurrentTeam => "tm:currentTeamId",
        }
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during ledger storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A read failed.
    #[error("read of {key} failed: {source}")]
    ReadFailed {
        /// Key being read.
        key: StorageKey,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A write failed.
    #[error("write of {key} failed: {reason}")]
    WriteFailed {
        /// Key being written.
        key: StorageKey,
        /// What went wrong.
        reason: String,
    },

    /// A stored value could not be decoded.
    #[error("stored {key} is corrupt: {reason}")]
    Corrupt {
        /// Key read.
        key: StorageKey,
        /// Decoder message.
        reason: String,
    },
}

/// Async string storage keyed by [`StorageKey`].
pub trait LedgerStorage: Send + Sync {
    /// Reads a value, `None` if the key was never written.
    fn get(
        &self,
        key: StorageKey,
    ) -> impl std::future::Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Writes a value, replacing any previous one.
    fn set(
        &self,
        key: StorageKey,
        value: String,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

    /// Removes a value. Removing a missing key is not an error.
    fn remove(
        &self,
        key: StorageKey,
    ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Map-backed storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    values: Arc<Mutex<HashMap<StorageKey, String>>>,
    fail_writes: Arc<AtomicBool>,
    failing_key: Arc<Mutex<Option<StorageKey>>>,
}

impl InMemoryStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following write and remove fail until turned off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes writes and removes of one key fail; `None` turns it off.
    pub fn fail_key(&self, key: Option<StorageKey>) {
        *self.failing_key.lock() = key;
    }

    /// Raw stored value, for inspection.
    #[must_use]
    pub fn raw(&self, key: StorageKey) -> Option<String> {
        self.values.lock().get(&key).cloned()
    }

    fn check_writable(&self, key: StorageKey) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) || *self.failing_key.lock() == Some(key) {
            return Err(StorageError::WriteFailed {
                key,
                reason: "storage full".to_string(),
            });
        }
        Ok(())
    }
}

impl LedgerStorage for InMemoryStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().get(&key).cloned())
    }

    async fn set(&self, key: StorageKey, value: String) -> Result<(), StorageError> {
        self.check_writable(key)?;
        self.values.lock().insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.check_writable(key)?;
        self.values.lock().remove(&key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Stores each key in its own file under a directory.
///
/// Writes go to a temporary file that is then renamed over the old one, so
/// a crash never leaves a half-written value behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Uses `dir`, which is created on the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: StorageKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.as_str().replace(':', "_")))
    }
}

impl LedgerStorage for FileStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::ReadFailed { key, source }),
        }
    }

    async fn set(&self, key: StorageKey, value: String) -> Result<(), StorageError> {
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            key,
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(write_failed)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await.map_err(write_failed)?;
        tokio::fs::rename(&tmp, &path).await.map_err(write_failed)?;
        tracing::trace!(key = %key, path = %path.display(), "ledger value written");
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::WriteFailed {
                key,
                reason: e.to_string(),
            }),
        }
    }
}
