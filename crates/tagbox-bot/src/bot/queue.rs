use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;

use crate::bot::context::BotContext;
use crate::handlers::handle_update;
use crate::telegram::Update;

/// One queue per chat: updates from the same chat are handled in order,
/// different chats run concurrently.
type QueueKey = i64;

pub(crate) type ChatQueueMap = Arc<Mutex<HashMap<QueueKey, mpsc::UnboundedSender<Update>>>>;

pub(crate) fn new_chat_queues() -> ChatQueueMap {
    Arc::new(Mutex::new(HashMap::new()))
}

fn chat_id(update: &Update) -> Option<i64> {
    [
        &update.message,
        &update.edited_message,
        &update.channel_post,
        &update.edited_channel_post,
    ]
    .into_iter()
    .flatten()
    .map(|message| message.chat.id)
    .next()
}

pub(crate) async fn dispatch_update(
    queues: &ChatQueueMap,
    context: &Arc<BotContext>,
    tracker: &TaskTracker,
    update: Update,
) {
    let Some(key) = chat_id(&update) else {
        tracing::debug!(update_id = update.update_id, "ignoring update without a chat");
        return;
    };

    let sender = {
        let mut queues = queues.lock().await;
        if let Some(sender) = queues.get(&key) {
            sender.clone()
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            spawn_queue_worker(key, receiver, Arc::clone(context), tracker);
            queues.insert(key, sender.clone());
            sender
        }
    };

    if let Err(err) = sender.send(update) {
        let update = err.0;
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_queue_worker(key, receiver, Arc::clone(context), tracker);
        {
            let mut queues = queues.lock().await;
            queues.insert(key, sender.clone());
        }
        let _ = sender.send(update);
    }
}

fn spawn_queue_worker(
    key: QueueKey,
    mut receiver: mpsc::UnboundedReceiver<Update>,
    context: Arc<BotContext>,
    tracker: &TaskTracker,
) {
    tracker.spawn(async move {
        while let Some(update) = receiver.recv().await {
            if let Err(err) = handle_update(context.as_ref(), update).await {
                tracing::error!(chat_id = key, error = %format!("{err:#}"), "update handling failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tagbox_core::config::IngestConfig;
    use tagbox_core::kv::MemoryKv;

    use super::*;
    use crate::ingest::AccessPolicy;
    use crate::replies::Outbox;
    use crate::testing::{CHANNEL_ID, RecordingOutbox, USER_ID, channel_text, private_text, update_with};

    #[tokio::test]
    async fn updates_are_handled_per_chat_in_order() {
        let tracker = TaskTracker::new();
        let outbox: Arc<dyn Outbox> = Arc::new(RecordingOutbox::default());
        let context = Arc::new(BotContext::new(
            Arc::new(MemoryKv::new()),
            outbox,
            AccessPolicy::new(HashSet::from([USER_ID]), HashSet::from([CHANNEL_ID])),
            IngestConfig::default(),
            tracker.clone(),
        ));
        let queues = new_chat_queues();

        dispatch_update(&queues, &context, &tracker, update_with("message", &private_text(1, "#a first"))).await;
        dispatch_update(&queues, &context, &tracker, update_with("channel_post", &channel_text(2, "post"))).await;
        dispatch_update(
            &queues,
            &context,
            &tracker,
            update_with("edited_message", &private_text(1, "#b second")),
        )
        .await;
        assert_eq!(queues.lock().await.len(), 2);

        queues.lock().await.clear();
        tracker.close();
        tracker.wait().await;

        let records = context.records().list().await.unwrap();
        assert_eq!(records.len(), 2);
        let edited = context.records().find_by_origin(USER_ID, 1).await.unwrap().unwrap();
        assert_eq!(edited.tags, vec!["b"]);
    }
}
