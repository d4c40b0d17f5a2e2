//! Key-value storage with per-entry expiry.
//!
//! Everything that must survive between updates (pending albums, records, the
//! tag index) goes through [`KvStore`]. Values are JSON text.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::{StorageBackend, StorageConfig};

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the current value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`. A `ttl` of `None` keeps the entry until deleted.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Stores `value` only if the current value equals `expected`
    /// (`None` meaning absent). Returns whether the write happened.
    async fn put_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool>;
}

/// Reads and decodes a JSON value.
///
/// # Errors
/// Returns an error if the store fails or the stored value does not decode.
pub async fn get_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = kv.get(key).await? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&raw).with_context(|| format!("decode value at '{key}'"))?;
    Ok(Some(value))
}

/// Encodes and writes a JSON value.
///
/// # Errors
/// Returns an error if encoding or the store write fails.
pub async fn put_json<T: Serialize + Sync>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()> {
    let raw = serde_json::to_string(value).with_context(|| format!("encode value at '{key}'"))?;
    kv.put(key, raw, ttl).await
}

struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process store. Expiry follows the tokio clock, so paused-time tests can
/// advance past a TTL.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.lock();
        if let Some(entry) = entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
            entries.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn put_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.lock();
        let current = entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.as_str());
        if current != expected {
            return Ok(false);
        }
        let expires_at = ttl.map(|ttl| now + ttl);
        entries.insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    /// Unix epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl FileEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now_ms)
    }
}

/// Single JSON file store. The whole map is rewritten atomically on every
/// mutation; expired entries are dropped on load and on write.
pub struct FileKv {
    path: PathBuf,
    entries: tokio::sync::Mutex<Option<HashMap<String, FileEntry>>>,
}

impl FileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<HashMap<String, FileEntry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read store {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse store {}", self.path.display()))
    }

    fn write_file(&self, entries: &HashMap<String, FileEntry>) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        let json = serde_json::to_vec(entries).context("encode store")?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&json).context("write store temp file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace store {}", self.path.display()))?;
        Ok(())
    }

    async fn with_entries<T>(
        &self,
        mutate: bool,
        apply: impl FnOnce(&mut HashMap<String, FileEntry>, i64) -> T + Send,
    ) -> Result<T> {
        let mut guard = self.entries.lock().await;
        let now_ms = Utc::now().timestamp_millis();
        if guard.is_none() {
            *guard = Some(self.read_file()?);
        }
        let entries = guard.get_or_insert_with(HashMap::new);
        entries.retain(|_, entry| entry.is_live(now_ms));
        if !mutate {
            return Ok(apply(entries, now_ms));
        }

        // The cache only takes the change once it is on disk.
        let mut staged = entries.clone();
        let result = apply(&mut staged, now_ms);
        self.write_file(&staged)?;
        *entries = staged;
        Ok(result)
    }
}

fn expiry_ms(now_ms: i64, ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|ttl| now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)))
}

#[async_trait]
impl KvStore for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(false, |entries, _| {
            entries.get(key).map(|entry| entry.value.clone())
        })
        .await
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.with_entries(true, |entries, now_ms| {
            entries.insert(
                key.to_string(),
                FileEntry {
                    value,
                    expires_at: expiry_ms(now_ms, ttl),
                },
            );
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_entries(true, |entries, _| {
            entries.remove(key);
        })
        .await
    }

    async fn put_if(
        &self,
        key: &str,
        expected: Option<&str>,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.with_entries(true, |entries, now_ms| {
            let current = entries.get(key).map(|entry| entry.value.as_str());
            if current != expected {
                return false;
            }
            entries.insert(
                key.to_string(),
                FileEntry {
                    value,
                    expires_at: expiry_ms(now_ms, ttl),
                },
            );
            true
        })
        .await
    }
}

/// Opens the backend selected in `[storage]`.
pub fn open(storage: &StorageConfig) -> Arc<dyn KvStore> {
    match storage.backend {
        StorageBackend::Memory => Arc::new(MemoryKv::new()),
        StorageBackend::File => Arc::new(FileKv::new(storage.effective_path())),
    }
}
