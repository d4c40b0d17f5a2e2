//! Content records produced by ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a record entered the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Sent directly in a private chat.
    Telegram,
    /// Forwarded into a private chat.
    TelegramForward,
    /// Posted in an allow-listed channel.
    TelegramChannel,
}

/// Who the content originally came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceInfo {
    User {
        user_id: String,
        first_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
    },
    Channel {
        channel_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_username: Option<String>,
    },
    /// Forward whose sender hid their account; only a display name is known.
    Hidden { name: String },
}

impl SourceInfo {
    /// Stable key used to deduplicate sources in metadata.
    pub fn key(&self) -> String {
        match self {
            SourceInfo::User {
                username: Some(username),
                ..
            } => username.clone(),
            SourceInfo::User { user_id, .. } => format!("user_{user_id}"),
            SourceInfo::Channel { channel_id, .. } => format!("channel_{channel_id}"),
            SourceInfo::Hidden { name } => format!("hidden_{name}"),
        }
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        match self {
            SourceInfo::User {
                username: Some(username),
                ..
            } => username,
            SourceInfo::User { first_name, .. } => first_name,
            SourceInfo::Channel {
                channel_title: Some(title),
                ..
            } => title,
            SourceInfo::Channel { channel_id, .. } => channel_id,
            SourceInfo::Hidden { name } => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Channel,
}

/// The platform message a record was created from. Edits are matched on
/// `(chat_id, message_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    pub chat_id: i64,
    pub message_id: i64,
    pub chat_kind: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<String>,
}

impl Origin {
    pub fn matches(&self, chat_id: i64, message_id: i64) -> bool {
        self.chat_id == chat_id && self.message_id == message_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Sticker,
    Audio,
    Voice,
    Video,
    Document,
}

/// Reference to a platform-hosted file. Files are never copied; `file_id` is
/// enough to fetch them later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    pub message_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_animated: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_video: bool,
}

impl MediaRef {
    pub fn new(kind: MediaKind, file_id: impl Into<String>, message_link: String) -> Self {
        Self {
            kind,
            file_id: file_id.into(),
            file_name: None,
            file_size: 0,
            message_link,
            mime_type: None,
            duration: None,
            width: None,
            height: None,
            thumbnail: None,
            emoji: None,
            is_animated: false,
            is_video: false,
        }
    }
}

/// A record carries nothing, one attachment, or an album.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Media {
    #[default]
    None,
    Single(MediaRef),
    Album(Vec<MediaRef>),
}

impl Media {
    pub fn is_none(&self) -> bool {
        matches!(self, Media::None)
    }

    pub fn len(&self) -> usize {
        match self {
            Media::None => 0,
            Media::Single(_) => 1,
            Media::Album(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn items(&self) -> &[MediaRef] {
        match self {
            Media::None => &[],
            Media::Single(item) => std::slice::from_ref(item),
            Media::Album(items) => items,
        }
    }
}

impl From<Option<MediaRef>> for Media {
    fn from(media: Option<MediaRef>) -> Self {
        media.map_or(Media::None, Media::Single)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    /// Unique, in first-seen order.
    pub tags: Vec<String>,
    pub body: String,
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_info: Option<SourceInfo>,
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Media::is_none")]
    pub media: Media,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited: bool,
}

/// Fields of a record before it is assigned an id.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub tags: Vec<String>,
    pub body: String,
    pub source_kind: SourceKind,
    pub source_info: Option<SourceInfo>,
    pub origin: Origin,
    pub media: Media,
}

impl NewRecord {
    pub fn into_record(self, now: DateTime<Utc>) -> ContentRecord {
        ContentRecord {
            id: generate_id(now),
            tags: self.tags,
            body: self.body,
            source_kind: self.source_kind,
            source_info: self.source_info,
            origin: self.origin,
            media: self.media,
            created_at: now,
            updated_at: None,
            edited: false,
        }
    }
}

/// `YYYYMMDDHHMMSS-xxxx`: sortable by creation time, with a random suffix for
/// records created within the same second.
pub fn generate_id(now: DateTime<Utc>) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(4)
        .collect();
    format!("{}-{suffix}", now.format("%Y%m%d%H%M%S"))
}
