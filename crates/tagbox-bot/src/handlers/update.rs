use anyhow::Result;
use tagbox_core::record::ContentRecord;

use crate::album::Collected;
use crate::bot::context::BotContext;
use crate::commands::{HELP_TEXT, parse_command};
use crate::ingest::{extract_content, single_record};
use crate::replies::{EMPTY_CONTENT, notify, saved_text, updated_text};
use crate::telegram::{Message, Update};

/// What handling one update did.
#[derive(Debug)]
pub enum Outcome {
    /// Nothing to do: unsupported update, empty edit, or unknown original.
    Ignored,
    /// Sender or channel is not allow-listed.
    Denied,
    /// A bot command was answered.
    Command,
    /// No text and no media.
    Empty,
    Created(ContentRecord),
    Album(Collected),
    Updated(ContentRecord),
}

/// Entry point for every inbound update.
///
/// # Errors
/// Returns an error if the store fails. Reply failures are logged only.
pub async fn handle_update(context: &BotContext, update: Update) -> Result<Outcome> {
    if let Some(message) = update.edited_message.or(update.edited_channel_post) {
        return handle_edit(context, message).await;
    }
    if let Some(message) = update.message.or(update.channel_post) {
        return handle_new(context, message).await;
    }
    tracing::debug!(update_id = update.update_id, "ignoring unsupported update");
    Ok(Outcome::Ignored)
}

async fn handle_new(context: &BotContext, message: Message) -> Result<Outcome> {
    let chat_id = message.chat.id;
    let message_id = message.message_id;

    // Unauthorized senders get no reply at all.
    if !context.access().allows(&message) {
        tracing::debug!(chat_id, message_id, chat_type = %message.chat.kind, "denied");
        return Ok(Outcome::Denied);
    }
    let private = message.chat.is_private();

    if private && message.text.as_deref().and_then(parse_command).is_some() {
        notify(context.outbox(), chat_id, Some(message_id), HELP_TEXT).await;
        return Ok(Outcome::Command);
    }

    if message.media_group_id.is_some() {
        let collected = context.albums().collect(message).await?;
        return Ok(Outcome::Album(collected));
    }

    let Some(new) = single_record(&message, context.settings()) else {
        tracing::debug!(chat_id, message_id, "empty message");
        if private {
            notify(context.outbox(), chat_id, Some(message_id), EMPTY_CONTENT).await;
        }
        return Ok(Outcome::Empty);
    };

    let record = context.records().add(new).await?;
    tracing::info!(chat_id, message_id, record_id = %record.id, tags = ?record.tags, "saved");
    if private {
        notify(context.outbox(), chat_id, Some(message_id), &saved_text(&record)).await;
    }
    Ok(Outcome::Created(record))
}

async fn handle_edit(context: &BotContext, message: Message) -> Result<Outcome> {
    let chat_id = message.chat.id;
    let message_id = message.message_id;

    if !context.access().allows(&message) {
        tracing::debug!(chat_id, message_id, "denied edit");
        return Ok(Outcome::Denied);
    }

    let content = extract_content(&message);
    if content.is_blank() {
        tracing::debug!(chat_id, message_id, "ignoring empty edit");
        return Ok(Outcome::Ignored);
    }

    let Some(existing) = context.records().find_by_origin(chat_id, message_id).await? else {
        tracing::debug!(chat_id, message_id, "no record for edited message");
        return Ok(Outcome::Ignored);
    };
    let tags = if content.tags.is_empty() {
        existing.tags
    } else {
        content.tags
    };

    let Some(record) = context
        .records()
        .update_by_origin(chat_id, message_id, tags, content.body)
        .await?
    else {
        return Ok(Outcome::Ignored);
    };
    tracing::info!(chat_id, message_id, record_id = %record.id, "updated from edit");

    if message.chat.is_private() {
        notify(context.outbox(), chat_id, Some(message_id), &updated_text(&record)).await;
    }
    Ok(Outcome::Updated(record))
}
