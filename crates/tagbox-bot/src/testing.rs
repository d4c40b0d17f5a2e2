//! Message fixtures shared by unit tests.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::replies::Outbox;
use crate::telegram::{Message, Update};

pub(crate) const USER_ID: i64 = 7;
pub(crate) const CHANNEL_ID: i64 = -100_500;

pub(crate) fn message(value: Value) -> Message {
    serde_json::from_value(value).unwrap()
}

pub(crate) fn private_text(message_id: i64, text: &str) -> Message {
    message(json!({
        "message_id": message_id,
        "chat": {"id": USER_ID, "type": "private", "first_name": "Ann"},
        "from": {"id": USER_ID, "is_bot": false, "first_name": "Ann", "username": "ann"},
        "date": 0,
        "text": text
    }))
}

pub(crate) fn channel_text(message_id: i64, text: &str) -> Message {
    message(json!({
        "message_id": message_id,
        "chat": {"id": CHANNEL_ID, "type": "channel", "title": "Rust News", "username": "rustnews"},
        "date": 0,
        "text": text
    }))
}

/// One photo of an album in the private chat.
pub(crate) fn private_album_part(message_id: i64, album_id: &str, caption: Option<&str>) -> Message {
    let mut value = json!({
        "message_id": message_id,
        "chat": {"id": USER_ID, "type": "private", "first_name": "Ann"},
        "from": {"id": USER_ID, "is_bot": false, "first_name": "Ann"},
        "date": 0,
        "media_group_id": album_id,
        "photo": [
            {"file_id": format!("small-{message_id}"), "width": 90, "height": 90, "file_size": 100},
            {"file_id": format!("photo-{message_id}"), "width": 800, "height": 600, "file_size": 9000}
        ]
    });
    if let Some(caption) = caption {
        value["caption"] = json!(caption);
    }
    message(value)
}

/// One photo of an album posted in the allow-listed channel.
pub(crate) fn channel_album_part(message_id: i64, album_id: &str, caption: Option<&str>) -> Message {
    let mut value = json!({
        "message_id": message_id,
        "chat": {"id": CHANNEL_ID, "type": "channel", "title": "Rust News", "username": "rustnews"},
        "date": 0,
        "media_group_id": album_id,
        "photo": [
            {"file_id": format!("photo-{message_id}"), "width": 800, "height": 600, "file_size": 9000}
        ]
    });
    if let Some(caption) = caption {
        value["caption"] = json!(caption);
    }
    message(value)
}

pub(crate) fn update_with(kind: &str, message: &Message) -> Update {
    serde_json::from_value(json!({
        "update_id": 1,
        kind: serde_json::to_value(message).unwrap()
    }))
    .unwrap()
}

/// Outbox that records every reply instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingOutbox {
    sent: Mutex<Vec<(i64, String)>>,
}

impl RecordingOutbox {
    pub(crate) fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Outbox for RecordingOutbox {
    async fn send_markdown(&self, chat_id: i64, _reply_to: Option<i64>, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}
