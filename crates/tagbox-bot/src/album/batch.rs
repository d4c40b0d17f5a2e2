use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tagbox_core::kv::KvStore;

use crate::telegram::Message;

/// Parts of one album received so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumBatch {
    /// Arrival order; sorted only when the album is finalized.
    pub parts: Vec<Message>,
    pub first_seen_at: DateTime<Utc>,
    /// Set by the finalizer that claimed the album.
    #[serde(default)]
    pub finalized: bool,
}

impl AlbumBatch {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            parts: Vec::new(),
            first_seen_at: now,
            finalized: false,
        }
    }

    pub fn contains(&self, message_id: i64) -> bool {
        self.parts.iter().any(|part| part.message_id == message_id)
    }
}

/// A batch plus the stored text it was decoded from, used as the expected
/// value for compare-and-swap writes.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub batch: AlbumBatch,
    raw: String,
}

/// Album batches in the key-value store under `media_group_<album id>`.
/// Every write refreshes the TTL.
#[derive(Clone)]
pub struct BatchStore {
    kv: Arc<dyn KvStore>,
    ttl: Duration,
}

impl BatchStore {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(album_id: &str) -> String {
        format!("media_group_{album_id}")
    }

    /// # Errors
    /// Returns an error if the store fails or the batch does not decode.
    pub async fn get(&self, album_id: &str) -> Result<Option<AlbumBatch>> {
        Ok(self.snapshot(album_id).await?.map(|snapshot| snapshot.batch))
    }

    /// # Errors
    /// Returns an error if the store fails or the batch does not decode.
    pub async fn snapshot(&self, album_id: &str) -> Result<Option<Snapshot>> {
        let Some(raw) = self.kv.get(&Self::key(album_id)).await? else {
            return Ok(None);
        };
        let batch = serde_json::from_str(&raw)
            .with_context(|| format!("decode album batch '{album_id}'"))?;
        Ok(Some(Snapshot { batch, raw }))
    }

    /// # Errors
    /// Returns an error if encoding or the store write fails.
    pub async fn put(&self, album_id: &str, batch: &AlbumBatch) -> Result<()> {
        let raw = encode(album_id, batch)?;
        self.kv.put(&Self::key(album_id), raw, Some(self.ttl)).await
    }

    /// Writes `batch` only if the stored batch is still `expected`
    /// (`None` meaning no batch). Returns whether the write happened.
    ///
    /// # Errors
    /// Returns an error if encoding or the store write fails.
    pub async fn put_if(
        &self,
        album_id: &str,
        expected: Option<&Snapshot>,
        batch: &AlbumBatch,
    ) -> Result<bool> {
        let raw = encode(album_id, batch)?;
        self.kv
            .put_if(
                &Self::key(album_id),
                expected.map(|snapshot| snapshot.raw.as_str()),
                raw,
                Some(self.ttl),
            )
            .await
    }

    /// # Errors
    /// Returns an error if the store fails.
    pub async fn delete(&self, album_id: &str) -> Result<()> {
        self.kv.delete(&Self::key(album_id)).await
    }
}

fn encode(album_id: &str, batch: &AlbumBatch) -> Result<String> {
    serde_json::to_string(batch).with_context(|| format!("encode album batch '{album_id}'"))
}
