//! Confirmation replies in private chats.
//!
//! Replies are best effort: a failed send is logged and never fails the
//! update that triggered it.

use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use tagbox_core::record::{ContentRecord, SourceInfo, SourceKind};

use crate::markup::escape;
use crate::telegram::{PARSE_MODE_MARKDOWN_V2, TelegramClient};

const PREVIEW_CHARS: usize = 80;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid code block pattern"));

pub(crate) const EMPTY_CONTENT: &str = "❌ Nothing to save: send text or media\\.";

/// Where replies go.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Sends MarkdownV2 `text` to `chat_id`, replying to `reply_to` if set.
    async fn send_markdown(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<()>;
}

#[async_trait]
impl Outbox for TelegramClient {
    async fn send_markdown(&self, chat_id: i64, reply_to: Option<i64>, text: &str) -> Result<()> {
        self.send_message(chat_id, text, reply_to, Some(PARSE_MODE_MARKDOWN_V2))
            .await
    }
}

/// Sends a reply, logging instead of failing.
pub(crate) async fn notify(outbox: &dyn Outbox, chat_id: i64, reply_to: Option<i64>, text: &str) {
    if let Err(err) = outbox.send_markdown(chat_id, reply_to, text).await {
        tracing::warn!(chat_id, error = %format!("{err:#}"), "failed to send reply");
    }
}

pub(crate) fn saved_text(record: &ContentRecord) -> String {
    let mut text = String::from("✅ *Saved*\n\n");
    push_summary(&mut text, record);
    text.push_str("\n_Edit the original message to update this entry\\._");
    text
}

pub(crate) fn updated_text(record: &ContentRecord) -> String {
    let mut text = String::from("🔄 *Updated*\n\n");
    push_summary(&mut text, record);
    text
}

fn push_summary(text: &mut String, record: &ContentRecord) {
    let tags: Vec<String> = record.tags.iter().map(|tag| format!("#{tag}")).collect();
    let mut lines = vec![format!("🏷 {}", escape(&tags.join(" ")))];
    if let Some(source) = forwarded_from(record) {
        lines.push(format!("📥 Forwarded from: {}", escape(&source)));
    }
    lines.push(format!("📝 {}", escape(&preview(record))));
    lines.push(format!("🆔 `{}`", record.id));

    text.push_str(&lines.join("\n"));
    text.push('\n');
}

fn forwarded_from(record: &ContentRecord) -> Option<String> {
    if record.source_kind != SourceKind::TelegramForward {
        return None;
    }
    Some(match record.source_info.as_ref()? {
        SourceInfo::User {
            username: Some(username),
            ..
        }
        | SourceInfo::Channel {
            channel_username: Some(username),
            ..
        } => format!("@{username}"),
        other => other.display_name().to_string(),
    })
}

/// First characters of the body on one line, with code blocks elided.
fn preview(record: &ContentRecord) -> String {
    let body = record.body.trim();
    if body.is_empty() {
        return match record.media.len() {
            1 => "1 media file".to_string(),
            count => format!("{count} media files"),
        };
    }

    let flattened = CODE_BLOCK.replace_all(body, "[code]").replace('\n', " ");
    let mut preview: String = flattened.chars().take(PREVIEW_CHARS).collect();
    if flattened.chars().count() > PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tagbox_core::record::{ChatKind, Media, NewRecord, Origin};

    use super::*;
    use crate::testing::RecordingOutbox;

    fn record(body: &str, source_kind: SourceKind, source_info: Option<SourceInfo>) -> ContentRecord {
        NewRecord {
            tags: vec!["inbox".to_string(), "to-read".to_string()],
            body: body.to_string(),
            source_kind,
            source_info,
            origin: Origin {
                chat_id: 7,
                message_id: 1,
                chat_kind: ChatKind::Private,
                channel_title: None,
                media_group_id: None,
            },
            media: Media::None,
        }
        .into_record(Utc::now())
    }

    #[test]
    fn saved_text_escapes_user_content() {
        let record = record("Hello (world).", SourceKind::Telegram, None);
        let text = saved_text(&record);
        assert!(text.starts_with("✅ *Saved*"));
        assert!(text.contains(r"🏷 \#inbox \#to\-read"));
        assert!(text.contains(r"📝 Hello \(world\)\."));
        assert!(text.contains(&format!("🆔 `{}`", record.id)));
        assert!(!text.contains("Forwarded"));
    }

    #[test]
    fn forwards_name_their_origin() {
        let record = record(
            "fwd",
            SourceKind::TelegramForward,
            Some(SourceInfo::User {
                user_id: "9".to_string(),
                first_name: "Bob".to_string(),
                username: Some("bob_b".to_string()),
            }),
        );
        assert!(updated_text(&record).contains(r"📥 Forwarded from: @bob\_b"));
    }

    #[test]
    fn previews_are_single_line_and_truncated() {
        let long = format!("```\ncode\n```\n{}", "x".repeat(200));
        let preview = preview(&record(&long, SourceKind::Telegram, None));
        assert!(preview.starts_with("[code] x"));
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 1);
    }

    #[tokio::test]
    async fn notify_sends_through_outbox() {
        let outbox = RecordingOutbox::default();
        notify(&outbox, 7, Some(1), EMPTY_CONTENT).await;
        assert_eq!(outbox.sent(), vec![(7, EMPTY_CONTENT.to_string())]);
    }
}
