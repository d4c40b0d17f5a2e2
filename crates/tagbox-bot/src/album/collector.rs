use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use tagbox_core::config::IngestConfig;
use tagbox_core::kv::KvStore;
use tagbox_core::record::{ChatKind, ContentRecord};
use tagbox_core::store::RecordStore;
use tokio_util::task::TaskTracker;

use super::batch::{AlbumBatch, BatchStore};
use crate::ingest::album_record;
use crate::replies::{Outbox, notify, saved_text};
use crate::telegram::Message;

const MAX_CAS_ATTEMPTS: usize = 16;

/// What happened to one collected part.
#[derive(Debug)]
pub enum Collected {
    /// Stored; a deferred check will finalize the album.
    Pending { parts: usize },
    /// The part was already in the batch.
    Duplicate,
    /// The album was already claimed by a finalizer; the part is dropped.
    Late,
    /// The part filled the album, which was finalized right away. `None` if
    /// another finalizer got there first or the album had no content.
    Finalized(Option<ContentRecord>),
}

/// Reassembles albums delivered as separate messages.
///
/// Parts accumulate in a [`BatchStore`] entry. The album is finalized as
/// soon as it reaches the maximum size, otherwise by a deferred check that
/// runs on the shared [`TaskTracker`] once deliveries settle. Claiming the
/// batch is a compare-and-swap, so only one finalizer ever writes a record.
#[derive(Clone)]
pub struct AlbumCollector {
    inner: Arc<Inner>,
}

struct Inner {
    batches: BatchStore,
    records: RecordStore,
    outbox: Arc<dyn Outbox>,
    settings: IngestConfig,
    tracker: TaskTracker,
}

impl AlbumCollector {
    pub fn new(
        kv: Arc<dyn KvStore>,
        records: RecordStore,
        outbox: Arc<dyn Outbox>,
        settings: IngestConfig,
        tracker: TaskTracker,
    ) -> Self {
        let batches = BatchStore::new(kv, settings.album_ttl());
        Self {
            inner: Arc::new(Inner {
                batches,
                records,
                outbox,
                settings,
                tracker,
            }),
        }
    }

    pub fn batches(&self) -> &BatchStore {
        &self.inner.batches
    }

    /// Adds `part` to its album batch.
    ///
    /// # Errors
    /// Returns an error if the part has no album id or the store fails.
    pub async fn collect(&self, part: Message) -> Result<Collected> {
        let album_id = part
            .media_group_id
            .clone()
            .ok_or_else(|| anyhow!("message {} is not part of an album", part.message_id))?;
        let message_id = part.message_id;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.inner.batches.snapshot(&album_id).await?;
            let mut batch = current.as_ref().map_or_else(
                || AlbumBatch::new(Utc::now()),
                |snapshot| snapshot.batch.clone(),
            );

            if batch.finalized {
                tracing::info!(
                    album_id = %album_id,
                    message_id,
                    "album already finalized, dropping late part"
                );
                return Ok(Collected::Late);
            }
            if batch.contains(message_id) {
                tracing::debug!(album_id = %album_id, message_id, "duplicate album part");
                // A redelivery may follow a failed save; check the album again.
                self.schedule_check(album_id);
                return Ok(Collected::Duplicate);
            }

            batch.parts.push(part.clone());
            let parts = batch.parts.len();
            if !self
                .inner
                .batches
                .put_if(&album_id, current.as_ref(), &batch)
                .await?
            {
                tracing::debug!(
                    album_id = %album_id,
                    message_id,
                    "album batch changed, retrying"
                );
                continue;
            }
            tracing::debug!(album_id = %album_id, message_id, parts, "album part stored");

            if parts >= self.inner.settings.album_max_parts {
                let record = self.finalize(&album_id).await?;
                return Ok(Collected::Finalized(record));
            }

            self.schedule_check(album_id);
            return Ok(Collected::Pending { parts });
        }

        bail!(
            "gave up storing part {message_id} of album '{album_id}' after {MAX_CAS_ATTEMPTS} conflicting writes"
        )
    }

    /// Turns the batch into a content record, at most once per album.
    /// Returns `None` if the batch is gone, already claimed, or empty.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub async fn finalize(&self, album_id: &str) -> Result<Option<ContentRecord>> {
        let batches = &self.inner.batches;
        let mut claimed = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(current) = batches.snapshot(album_id).await? else {
                return Ok(None);
            };
            if current.batch.finalized {
                return Ok(None);
            }
            let mut batch = current.batch.clone();
            batch.finalized = true;
            // Losing means another finalizer claimed it or a part arrived.
            if batches.put_if(album_id, Some(&current), &batch).await? {
                claimed = Some(batch);
                break;
            }
        }
        let Some(batch) = claimed else {
            bail!("gave up claiming album '{album_id}' after {MAX_CAS_ATTEMPTS} conflicting writes");
        };

        let record = match album_record(&batch.parts, &self.inner.settings) {
            Some(new) => match self.inner.records.add(new).await {
                Ok(record) => Some(record),
                Err(err) => {
                    self.release(album_id).await;
                    return Err(err.context(format!("save album '{album_id}'")));
                }
            },
            None => {
                tracing::info!(album_id, "album has no content, nothing saved");
                None
            }
        };
        batches.delete(album_id).await?;

        if let Some(record) = &record {
            tracing::info!(
                album_id,
                record_id = %record.id,
                media = record.media.len(),
                "album saved"
            );
            if record.origin.chat_kind == ChatKind::Private {
                notify(
                    self.inner.outbox.as_ref(),
                    record.origin.chat_id,
                    Some(record.origin.message_id),
                    &saved_text(record),
                )
                .await;
            }
        }
        Ok(record)
    }

    /// Clears the claim so a later check can finalize the album again.
    /// Failures are logged; the batch then expires with its TTL.
    async fn release(&self, album_id: &str) {
        let batches = &self.inner.batches;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = match batches.snapshot(album_id).await {
                Ok(Some(current)) if current.batch.finalized => current,
                Ok(_) => return,
                Err(err) => {
                    tracing::warn!(album_id, error = %format!("{err:#}"), "failed to release album");
                    return;
                }
            };
            let mut batch = current.batch.clone();
            batch.finalized = false;
            match batches.put_if(album_id, Some(&current), &batch).await {
                Ok(true) => {
                    tracing::info!(album_id, "album released after failed save");
                    return;
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(album_id, error = %format!("{err:#}"), "failed to release album");
                    return;
                }
            }
        }
        tracing::warn!(album_id, "gave up releasing album");
    }

    /// Finalizes the album after the settle delay unless something else
    /// did. Never awaited by the caller; if the process exits first, the
    /// batch simply expires.
    fn schedule_check(&self, album_id: String) {
        let collector = self.clone();
        let delay = self.inner.settings.album_settle_delay();
        self.inner.tracker.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = collector.finalize(&album_id).await {
                tracing::warn!(
                    album_id = %album_id,
                    error = %format!("{err:#}"),
                    "deferred album check failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tagbox_core::kv::MemoryKv;
    use tagbox_core::record::{SourceInfo, SourceKind};

    use super::*;
    use crate::testing::{
        CHANNEL_ID, RecordingOutbox, USER_ID, channel_album_part, private_album_part,
    };

    /// Memory store whose first write to `collections` fails.
    #[derive(Default)]
    struct FailFirstSave {
        inner: MemoryKv,
        failed: AtomicBool,
    }

    #[async_trait]
    impl KvStore for FailFirstSave {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
            self.inner.put(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn put_if(
            &self,
            key: &str,
            expected: Option<&str>,
            value: String,
            ttl: Option<Duration>,
        ) -> Result<bool> {
            if key == "collections" && !self.failed.swap(true, Ordering::SeqCst) {
                bail!("store unavailable");
            }
            self.inner.put_if(key, expected, value, ttl).await
        }
    }

    struct Harness {
        collector: AlbumCollector,
        records: RecordStore,
        outbox: Arc<RecordingOutbox>,
        tracker: TaskTracker,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_kv(Arc::new(MemoryKv::new()))
        }

        fn with_kv(kv: Arc<dyn KvStore>) -> Self {
            let records = RecordStore::new(Arc::clone(&kv));
            let outbox = Arc::new(RecordingOutbox::default());
            let tracker = TaskTracker::new();
            let collector = AlbumCollector::new(
                kv,
                records.clone(),
                Arc::clone(&outbox) as Arc<dyn Outbox>,
                IngestConfig::default(),
                tracker.clone(),
            );
            Self {
                collector,
                records,
                outbox,
                tracker,
            }
        }

        async fn settle(&self) {
            self.tracker.close();
            self.tracker.wait().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_parts_finalize_in_message_order() {
        let harness = Harness::new();
        for (message_id, caption) in [(3, None), (1, Some("trip #travel")), (2, None)] {
            let collected = harness
                .collector
                .collect(private_album_part(message_id, "G1", caption))
                .await
                .unwrap();
            assert!(matches!(collected, Collected::Pending { .. }));
        }

        harness.settle().await;

        let records = harness.records.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let media: Vec<&str> = records[0]
            .media
            .items()
            .iter()
            .map(|media| media.file_id.as_str())
            .collect();
        assert_eq!(media, vec!["photo-1", "photo-2", "photo-3"]);
        assert_eq!(records[0].tags, vec!["travel"]);
        assert!(harness.collector.batches().get("G1").await.unwrap().is_none());

        let sent = harness.outbox.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, USER_ID);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_parts_are_stored_once() {
        let harness = Harness::new();
        let first = harness
            .collector
            .collect(private_album_part(1, "G2", None))
            .await
            .unwrap();
        let again = harness
            .collector
            .collect(private_album_part(1, "G2", None))
            .await
            .unwrap();

        assert!(matches!(first, Collected::Pending { parts: 1 }));
        assert!(matches!(again, Collected::Duplicate));
        let batch = harness.collector.batches().get("G2").await.unwrap().unwrap();
        assert_eq!(batch.parts.len(), 1);

        harness.settle().await;
        assert_eq!(harness.records.list().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tenth_part_finalizes_immediately() {
        let harness = Harness::new();
        for message_id in 1..10 {
            let collected = harness
                .collector
                .collect(private_album_part(message_id, "G3", None))
                .await
                .unwrap();
            assert!(matches!(collected, Collected::Pending { .. }));
        }

        let collected = harness
            .collector
            .collect(private_album_part(10, "G3", None))
            .await
            .unwrap();
        let Collected::Finalized(Some(record)) = collected else {
            panic!("expected the tenth part to finalize, got {collected:?}");
        };
        assert_eq!(record.media.len(), 10);
        assert_eq!(record.tags, vec!["media"]);

        // Deferred checks from the first nine parts find nothing to do.
        harness.settle().await;
        assert_eq!(harness.records.list().await.unwrap().len(), 1);
        assert_eq!(harness.outbox.sent().len(), 1);
    }

    #[tokio::test]
    async fn finalize_runs_once() {
        let harness = Harness::new();
        harness
            .collector
            .batches()
            .put("G4", &{
                let mut batch = AlbumBatch::new(Utc::now());
                batch.parts.push(private_album_part(1, "G4", Some("#once")));
                batch
            })
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            harness.collector.finalize("G4"),
            harness.collector.finalize("G4")
        );
        let saved = [first.unwrap(), second.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(saved, 1);
        assert!(harness.collector.finalize("G4").await.unwrap().is_none());
        assert_eq!(harness.records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parts_after_claim_are_dropped() {
        let harness = Harness::new();
        let mut claimed = AlbumBatch::new(Utc::now());
        claimed.parts.push(private_album_part(1, "G5", None));
        claimed.finalized = true;
        harness.collector.batches().put("G5", &claimed).await.unwrap();

        let collected = harness
            .collector
            .collect(private_album_part(2, "G5", None))
            .await
            .unwrap();
        assert!(matches!(collected, Collected::Late));
        let batch = harness.collector.batches().get("G5").await.unwrap().unwrap();
        assert_eq!(batch.parts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_album_is_tagged_for_the_channel_and_not_confirmed() {
        let harness = Harness::new();
        for message_id in [2, 1] {
            harness
                .collector
                .collect(channel_album_part(message_id, "C1", None))
                .await
                .unwrap();
        }

        harness.settle().await;

        let records = harness.records.list().await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.tags, vec!["channel", "channel_rust_news"]);
        assert_eq!(record.source_kind, SourceKind::TelegramChannel);
        assert_eq!(
            record.source_info,
            Some(SourceInfo::Channel {
                channel_id: CHANNEL_ID.to_string(),
                channel_title: Some("Rust News".to_string()),
                channel_username: Some("rustnews".to_string()),
            })
        );
        assert_eq!(record.media.len(), 2);
        assert!(harness.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn failed_save_releases_the_album() {
        let harness = Harness::with_kv(Arc::new(FailFirstSave::default()));
        harness
            .collector
            .batches()
            .put("G7", &{
                let mut batch = AlbumBatch::new(Utc::now());
                batch.parts.push(private_album_part(1, "G7", Some("#retry")));
                batch
            })
            .await
            .unwrap();

        assert!(harness.collector.finalize("G7").await.is_err());
        let batch = harness.collector.batches().get("G7").await.unwrap().unwrap();
        assert!(!batch.finalized);

        let late = harness
            .collector
            .collect(private_album_part(2, "G7", None))
            .await
            .unwrap();
        assert!(matches!(late, Collected::Pending { parts: 2 }));

        let record = harness.collector.finalize("G7").await.unwrap().unwrap();
        assert_eq!(record.tags, vec!["retry"]);
        assert_eq!(record.media.len(), 2);
        assert_eq!(harness.records.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn parts_without_album_id_are_rejected() {
        let harness = Harness::new();
        let mut part = private_album_part(1, "G6", None);
        part.media_group_id = None;
        assert!(harness.collector.collect(part).await.is_err());
    }
}
