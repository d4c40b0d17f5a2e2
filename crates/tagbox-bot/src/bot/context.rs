use std::sync::Arc;

use tagbox_core::config::IngestConfig;
use tagbox_core::kv::KvStore;
use tagbox_core::store::RecordStore;
use tokio_util::task::TaskTracker;

use crate::album::AlbumCollector;
use crate::ingest::AccessPolicy;
use crate::replies::Outbox;

/// Everything an update handler needs. Shared by the polling loop and the
/// webhook server.
pub struct BotContext {
    records: RecordStore,
    albums: AlbumCollector,
    outbox: Arc<dyn Outbox>,
    access: AccessPolicy,
    settings: IngestConfig,
}

impl BotContext {
    /// Deferred album checks are spawned on `tracker`.
    pub fn new(
        kv: Arc<dyn KvStore>,
        outbox: Arc<dyn Outbox>,
        access: AccessPolicy,
        settings: IngestConfig,
        tracker: TaskTracker,
    ) -> Self {
        let records = RecordStore::new(Arc::clone(&kv));
        let albums = AlbumCollector::new(
            kv,
            records.clone(),
            Arc::clone(&outbox),
            settings.clone(),
            tracker,
        );
        Self {
            records,
            albums,
            outbox,
            access,
            settings,
        }
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn albums(&self) -> &AlbumCollector {
        &self.albums
    }

    pub(crate) fn outbox(&self) -> &dyn Outbox {
        self.outbox.as_ref()
    }

    pub(crate) fn access(&self) -> &AccessPolicy {
        &self.access
    }

    pub(crate) fn settings(&self) -> &IngestConfig {
        &self.settings
    }
}
