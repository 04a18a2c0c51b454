//! Local persistence cache.
//!
//! A durable key-value store that the client treats as the source of truth
//! while the network is unavailable. Values are JSON. Two implementations:
//!
//! - [`FileCache`]: one JSON file per key, written atomically (temp + rename).
//! - [`MemoryCache`]: process-local map, for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::remote::Params;

/// Durable key-value store primitives.
pub trait LocalCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError>;

    fn del(&self, key: &str) -> Result<(), CacheError>;

    /// All keys starting with `prefix`, sorted.
    fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

impl dyn LocalCache + '_ {
    /// Read and deserialize an entry. Entries of the wrong shape read as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let Some(value) = self.get(key)? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(key, error = %e, "cached entry has unexpected shape");
                Ok(None)
            }
        }
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let value = serde_json::to_value(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.set(key, &value)
    }
}

/// Cache key for a remote `(key, params)` pair.
///
/// Params are sorted so the same logical request always maps to one entry.
pub fn cache_key(key: &str, params: &Params) -> String {
    if params.is_empty() {
        return format!("kv:{key}");
    }
    let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("kv:{key}?{}", query.join("&"))
}

/// In-memory cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// File-backed cache: `<dir>/<hex(key)>.json`.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Open (and create if needed) a cache directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| io_error(&dir, source))?;
        debug!(path = %dir.display(), "opened local cache");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(key.as_bytes())))
    }
}

impl LocalCache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| io_error(&path, source))?;
        let value = serde_json::from_str(&content).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(value))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");
        let content = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;

        fs::write(&tmp_path, content).map_err(|source| io_error(&tmp_path, source))?;
        fs::rename(&tmp_path, &path).map_err(|source| io_error(&path, source))?;
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(&path, source)),
        }
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| io_error(&self.dir, source))?;

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| io_error(&self.dir, source))?;
            let path = entry.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| hex::decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok())
            else {
                continue;
            };
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}
