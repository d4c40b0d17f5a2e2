//! Turning Telegram messages into content records.

use std::collections::HashSet;

use tagbox_core::config::IngestConfig;
use tagbox_core::record::{
    ChatKind, Media, MediaKind, MediaRef, NewRecord, Origin, SourceInfo, SourceKind,
};

use crate::markup::{RenderMode, render_entities};
use crate::tags::{channel_tag, extract_tags};
use crate::telegram::{Chat, Message, MessageOrigin, PhotoSize, User};

/// Who may file content: private senders by user id, channels by chat id.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    user_ids: HashSet<i64>,
    chat_ids: HashSet<i64>,
}

impl AccessPolicy {
    pub fn new(user_ids: HashSet<i64>, chat_ids: HashSet<i64>) -> Self {
        Self { user_ids, chat_ids }
    }

    /// Groups and bots are never allowed.
    pub fn allows(&self, message: &Message) -> bool {
        if message.chat.is_channel() {
            return self.chat_ids.contains(&message.chat.id);
        }
        if !message.chat.is_private() {
            return false;
        }
        message
            .from
            .as_ref()
            .is_some_and(|user| !user.is_bot && self.user_ids.contains(&user.id))
    }
}

/// Rendered body and hashtags of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub body: String,
    pub tags: Vec<String>,
}

impl Content {
    pub fn is_blank(&self) -> bool {
        self.body.trim().is_empty()
    }
}

/// Renders text or caption to standard Markdown. Hashtags stay in the body.
pub fn extract_content(message: &Message) -> Content {
    let text = message.text_or_caption().unwrap_or_default();
    let body = render_entities(text, message.text_entities(), RenderMode::Standard);
    let tags = extract_tags(&body);
    Content { body, tags }
}

pub fn chat_kind(chat: &Chat) -> Option<ChatKind> {
    if chat.is_private() {
        Some(ChatKind::Private)
    } else if chat.is_channel() {
        Some(ChatKind::Channel)
    } else {
        None
    }
}

/// Public link when the chat has a username, `t.me/c/` otherwise.
pub fn message_link(message: &Message) -> String {
    match message.chat.username.as_deref() {
        Some(username) => format!("https://t.me/{username}/{}", message.message_id),
        None => format!(
            "https://t.me/c/{}/{}",
            message.chat.id.unsigned_abs(),
            message.message_id
        ),
    }
}

/// The single attachment a message carries, if any.
pub fn media_ref(message: &Message) -> Option<MediaRef> {
    let link = message_link(message);
    let thumb = |thumbnail: Option<&PhotoSize>| thumbnail.map(|photo| photo.file_id.clone());

    if let Some(photo) = message.photo.as_deref().and_then(largest_photo) {
        let mut media = MediaRef::new(MediaKind::Photo, &photo.file_id, link);
        media.file_size = photo.file_size.unwrap_or_default();
        media.width = Some(photo.width);
        media.height = Some(photo.height);
        return Some(media);
    }
    if let Some(sticker) = &message.sticker {
        let mut media = MediaRef::new(MediaKind::Sticker, &sticker.file_id, link);
        media.file_name = Some("sticker".to_string());
        media.file_size = sticker.file_size.unwrap_or_default();
        media.width = Some(sticker.width);
        media.height = Some(sticker.height);
        media.thumbnail = thumb(sticker.thumbnail.as_ref());
        media.emoji.clone_from(&sticker.emoji);
        media.is_animated = sticker.is_animated;
        media.is_video = sticker.is_video;
        return Some(media);
    }
    if let Some(audio) = &message.audio {
        let mut media = MediaRef::new(MediaKind::Audio, &audio.file_id, link);
        media.file_name = Some(
            audio
                .file_name
                .clone()
                .or_else(|| audio.title.clone())
                .unwrap_or_else(|| "audio".to_string()),
        );
        media.file_size = audio.file_size.unwrap_or_default();
        media.mime_type.clone_from(&audio.mime_type);
        media.duration = Some(audio.duration);
        media.thumbnail = thumb(audio.thumbnail.as_ref());
        return Some(media);
    }
    if let Some(voice) = &message.voice {
        let mut media = MediaRef::new(MediaKind::Voice, &voice.file_id, link);
        media.file_name = Some("voice_message.ogg".to_string());
        media.file_size = voice.file_size.unwrap_or_default();
        media.mime_type.clone_from(&voice.mime_type);
        media.duration = Some(voice.duration);
        return Some(media);
    }
    if let Some(video) = &message.video {
        let mut media = MediaRef::new(MediaKind::Video, &video.file_id, link);
        media.file_name = Some(
            video
                .file_name
                .clone()
                .unwrap_or_else(|| "video".to_string()),
        );
        media.file_size = video.file_size.unwrap_or_default();
        media.mime_type.clone_from(&video.mime_type);
        media.duration = Some(video.duration);
        media.width = Some(video.width);
        media.height = Some(video.height);
        media.thumbnail = thumb(video.thumbnail.as_ref());
        return Some(media);
    }
    if let Some(document) = &message.document {
        let mut media = MediaRef::new(MediaKind::Document, &document.file_id, link);
        media.file_name = Some(
            document
                .file_name
                .clone()
                .unwrap_or_else(|| "document".to_string()),
        );
        media.file_size = document.file_size.unwrap_or_default();
        media.mime_type.clone_from(&document.mime_type);
        media.thumbnail = thumb(document.thumbnail.as_ref());
        return Some(media);
    }
    None
}

fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.iter().max_by_key(|photo| {
        photo
            .file_size
            .unwrap_or_else(|| u64::from(photo.width) * u64::from(photo.height))
    })
}

/// Where a forwarded message originally came from, if it is a forward.
fn forward_source(message: &Message) -> Option<SourceInfo> {
    if let Some(user) = &message.forward_from {
        return Some(user_source(user));
    }
    if let Some(chat) = &message.forward_from_chat {
        return Some(channel_source(chat));
    }
    if let Some(name) = &message.forward_sender_name {
        return Some(SourceInfo::Hidden { name: name.clone() });
    }
    match message.forward_origin.as_ref()? {
        MessageOrigin::User { sender_user } => Some(user_source(sender_user)),
        MessageOrigin::Chat { sender_chat: chat } | MessageOrigin::Channel { chat } => {
            Some(channel_source(chat))
        }
        MessageOrigin::HiddenUser { sender_user_name } => Some(SourceInfo::Hidden {
            name: sender_user_name.clone(),
        }),
    }
}

fn user_source(user: &User) -> SourceInfo {
    SourceInfo::User {
        user_id: user.id.to_string(),
        first_name: if user.first_name.is_empty() {
            "Unknown".to_string()
        } else {
            user.first_name.clone()
        },
        username: user.username.clone(),
    }
}

fn channel_source(chat: &Chat) -> SourceInfo {
    SourceInfo::Channel {
        channel_id: chat.id.to_string(),
        channel_title: chat.title.clone(),
        channel_username: chat.username.clone(),
    }
}

/// Channel posts come from the channel. Private messages come from the
/// forward origin when forwarded, else from the sender.
pub fn source_info(message: &Message) -> Option<SourceInfo> {
    if message.chat.is_channel() {
        return Some(channel_source(&message.chat));
    }
    forward_source(message).or_else(|| message.from.as_ref().map(user_source))
}

pub fn source_kind(message: &Message) -> SourceKind {
    if message.chat.is_channel() {
        SourceKind::TelegramChannel
    } else if forward_source(message).is_some() {
        SourceKind::TelegramForward
    } else {
        SourceKind::Telegram
    }
}

/// Extracted tags, or `fallback` when there are none; channels also get
/// their `channel_<title>` tag.
fn finalize_tags(mut tags: Vec<String>, chat: &Chat, fallback: &str) -> Vec<String> {
    if tags.is_empty() {
        tags.push(fallback.to_string());
    }
    if chat.is_channel()
        && let Some(tag) = chat.title.as_deref().and_then(channel_tag)
        && !tags.contains(&tag)
    {
        tags.push(tag);
    }
    tags
}

fn origin(message: &Message, chat_kind: ChatKind) -> Origin {
    Origin {
        chat_id: message.chat.id,
        message_id: message.message_id,
        chat_kind,
        channel_title: match chat_kind {
            ChatKind::Channel => message.chat.title.clone(),
            ChatKind::Private => None,
        },
        media_group_id: message.media_group_id.clone(),
    }
}

/// Record for a standalone message. `None` when there is neither text nor
/// media, or the chat is neither private nor a channel.
pub fn single_record(message: &Message, settings: &IngestConfig) -> Option<NewRecord> {
    let chat_kind = chat_kind(&message.chat)?;
    let content = extract_content(message);
    let media = media_ref(message);
    if content.is_blank() && media.is_none() {
        return None;
    }

    let fallback = match chat_kind {
        ChatKind::Private => &settings.private_default_tag,
        ChatKind::Channel => &settings.channel_default_tag,
    };
    Some(NewRecord {
        tags: finalize_tags(content.tags, &message.chat, fallback),
        body: content.body,
        source_kind: source_kind(message),
        source_info: source_info(message),
        origin: origin(message, chat_kind),
        media: Media::from(media),
    })
}

/// Record for a whole album. The lowest message id supplies body, tags,
/// source and origin; media keep message id order.
pub fn album_record(parts: &[Message], settings: &IngestConfig) -> Option<NewRecord> {
    let mut sorted: Vec<&Message> = parts.iter().collect();
    sorted.sort_by_key(|part| part.message_id);
    let first = *sorted.first()?;
    let chat_kind = chat_kind(&first.chat)?;

    let content = extract_content(first);
    let media: Vec<MediaRef> = sorted.iter().filter_map(|part| media_ref(part)).collect();
    if content.is_blank() && media.is_empty() {
        return None;
    }

    let fallback = match chat_kind {
        ChatKind::Private => &settings.album_default_tag,
        ChatKind::Channel => &settings.channel_default_tag,
    };
    Some(NewRecord {
        tags: finalize_tags(content.tags, &first.chat, fallback),
        body: content.body,
        source_kind: source_kind(first),
        source_info: source_info(first),
        origin: origin(first, chat_kind),
        media: Media::Album(media),
    })
}
