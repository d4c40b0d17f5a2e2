//! Content record persistence and the tag index.
//!
//! Layout in the key-value store:
//! - `collections`: every record, in creation order
//! - `tag_<tag>`: ids of records carrying `<tag>`
//! - `metadata`: counts, known tags and known sources
//!
//! Each key is updated with a compare-and-swap loop so concurrent writers
//! (e.g. two albums finalizing at once) never drop each other's changes.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::kv::{KvStore, get_json};
use crate::record::{ContentRecord, NewRecord, SourceInfo};

const COLLECTIONS_KEY: &str = "collections";
const METADATA_KEY: &str = "metadata";
const MAX_CAS_ATTEMPTS: usize = 16;

fn tag_key(tag: &str) -> String {
    format!("tag_{tag}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub total_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub tag_list: Vec<String>,
    pub source_list: Vec<SourceEntry>,
}

#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KvStore>,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Assigns an id, appends the record and indexes its tags.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn add(&self, new: NewRecord) -> Result<ContentRecord> {
        let now = Utc::now();
        let record = new.into_record(now);

        let snapshot = record.clone();
        let collections = self
            .update(COLLECTIONS_KEY, |records: &mut Vec<ContentRecord>| {
                records.push(snapshot.clone());
            })
            .await
            .context("append record")?;

        for tag in &record.tags {
            self.index_tag(tag, &record.id).await?;
        }
        self.refresh_metadata(&collections, record.source_info.as_ref(), now)
            .await?;

        Ok(record)
    }

    /// Finds the record created from a platform message.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn find_by_origin(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<ContentRecord>> {
        let records = self.list().await?;
        Ok(records
            .into_iter()
            .find(|record| record.origin.matches(chat_id, message_id)))
    }

    /// Replaces tags and body of the record created from a platform message
    /// and marks it edited. Returns `None` if no such record exists.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn update_by_origin(
        &self,
        chat_id: i64,
        message_id: i64,
        tags: Vec<String>,
        body: String,
    ) -> Result<Option<ContentRecord>> {
        let now = Utc::now();
        let mut previous: Option<ContentRecord> = None;
        let mut updated: Option<ContentRecord> = None;
        let collections = self
            .update(COLLECTIONS_KEY, |records: &mut Vec<ContentRecord>| {
                previous = None;
                updated = None;
                if let Some(record) = records
                    .iter_mut()
                    .find(|record| record.origin.matches(chat_id, message_id))
                {
                    previous = Some(record.clone());
                    record.tags.clone_from(&tags);
                    record.body.clone_from(&body);
                    record.updated_at = Some(now);
                    record.edited = true;
                    updated = Some(record.clone());
                }
            })
            .await
            .context("update record")?;

        let (Some(previous), Some(updated)) = (previous, updated) else {
            return Ok(None);
        };

        for tag in previous.tags.iter().filter(|tag| !updated.tags.contains(tag)) {
            self.unindex_tag(tag, &updated.id).await?;
        }
        for tag in &updated.tags {
            self.index_tag(tag, &updated.id).await?;
        }
        self.refresh_metadata(&collections, None, now).await?;

        Ok(Some(updated))
    }

    /// All records in creation order.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<ContentRecord>> {
        Ok(get_json(self.kv.as_ref(), COLLECTIONS_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Ids of records carrying `tag`.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn ids_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        Ok(get_json(self.kv.as_ref(), &tag_key(tag))
            .await?
            .unwrap_or_default())
    }

    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn metadata(&self) -> Result<Metadata> {
        Ok(get_json(self.kv.as_ref(), METADATA_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn index_tag(&self, tag: &str, id: &str) -> Result<()> {
        self.update(&tag_key(tag), |ids: &mut Vec<String>| {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        })
        .await
        .with_context(|| format!("index tag '{tag}'"))?;
        Ok(())
    }

    async fn unindex_tag(&self, tag: &str, id: &str) -> Result<()> {
        self.update(&tag_key(tag), |ids: &mut Vec<String>| {
            ids.retain(|existing| existing != id);
        })
        .await
        .with_context(|| format!("unindex tag '{tag}'"))?;
        Ok(())
    }

    async fn refresh_metadata(
        &self,
        collections: &[ContentRecord],
        source: Option<&SourceInfo>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tag_list: Vec<String> = Vec::new();
        for tag in collections.iter().flat_map(|record| record.tags.iter()) {
            if !tag_list.contains(tag) {
                tag_list.push(tag.clone());
            }
        }

        self.update(METADATA_KEY, |metadata: &mut Metadata| {
            metadata.total_count = collections.len();
            metadata.last_updated = Some(now);
            metadata.tag_list.clone_from(&tag_list);
            if let Some(source) = source {
                let key = source.key();
                if !metadata.source_list.iter().any(|entry| entry.key == key) {
                    metadata.source_list.push(SourceEntry {
                        key,
                        name: source.display_name().to_string(),
                    });
                }
            }
        })
        .await
        .context("update metadata")?;
        Ok(())
    }

    /// Read-modify-write of one JSON value, retried until the compare-and-swap
    /// lands. `apply` may run more than once and must start from the value it
    /// is given. Returns the value that was written.
    async fn update<T, F>(&self, key: &str, mut apply: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Default + Send,
        F: FnMut(&mut T) + Send,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.kv.get(key).await?;
            let mut value: T = match current.as_deref() {
                Some(raw) => serde_json::from_str(raw)
                    .with_context(|| format!("decode value at '{key}'"))?,
                None => T::default(),
            };
            apply(&mut value);
            let encoded =
                serde_json::to_string(&value).with_context(|| format!("encode value at '{key}'"))?;
            if self
                .kv
                .put_if(key, current.as_deref(), encoded, None)
                .await?
            {
                return Ok(value);
            }
            tracing::debug!(key, "concurrent write detected, retrying");
        }
        bail!("gave up updating '{key}' after {MAX_CAS_ATTEMPTS} conflicting writes")
    }
}
