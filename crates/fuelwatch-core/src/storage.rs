//! Backing storage for persisted settings.
//!
//! The store writes its snapshot as a single JSON blob addressed by a fixed
//! storage key, the way a browser's local storage would hold it. Two
//! implementations are provided:
//! - `MemoryStorage`: in-process map, optionally with a byte quota
//! - `FileStorage`: one `<key>.json` file per key in a settings directory
//!
//! All methods are synchronous. Errors are returned to the caller; the state
//! store decides whether they matter (they never reach its consumers).

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the underlying medium failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The write would exceed the storage quota.
    #[error("Quota exceeded writing {key}: {required} bytes needed, {quota} allowed")]
    QuotaExceeded {
        key: String,
        required: usize,
        quota: usize,
    },

    /// The key cannot be used to address a blob.
    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    /// The snapshot could not be serialized.
    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Abstract key-value blob storage.
///
/// Keys are short identifiers such as `fuelApp_settings`; values are opaque
/// strings (the store writes JSON).
pub trait SettingsStorage: Send + Sync {
    /// Load the blob stored under `key`, or `None` if nothing is stored.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `blob` under `key`, replacing any previous value.
    fn save(&self, key: &str, blob: &str) -> Result<(), StorageError>;

    /// Delete the blob stored under `key`. Deleting a missing key succeeds.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Check if a key exists.
    fn has_key(&self, key: &str) -> bool {
        matches!(self.load(key), Ok(Some(_)))
    }
}

/// In-memory storage.
///
/// With a quota set, writes that would push the total size of all keys and
/// values past the quota fail with [`StorageError::QuotaExceeded`] and leave
/// the previous value in place.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage that rejects writes beyond `quota` bytes in total.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Total bytes used by keys and values.
    pub fn used_bytes(&self) -> usize {
        self.data
            .read()
            .iter()
            .map(|(key, value)| key.len() + value.len())
            .sum()
    }
}

impl SettingsStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StorageError> {
        let mut data = self.data.write();

        if let Some(quota) = self.quota {
            let others: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let required = others + key.len() + blob.len();
            if required > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    required,
                    quota,
                });
            }
        }

        data.insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// File-backed storage.
///
/// Each key maps to `<dir>/<key>.json`. Writes go to a temporary file that is
/// then renamed over the target, so a crash never leaves a half-written blob.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Create a storage rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage in the platform configuration directory
    /// (e.g. `~/.config/fuelwatch` on Linux).
    ///
    /// Returns `None` if the platform has no configuration directory.
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("fuelwatch")))
    }

    /// The directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl SettingsStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keys become file names, so only a conservative character set is allowed.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}
