//! Telegram ingestion for tagbox: turns messages, channel posts, edits and
//! albums into tagged content records.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tagbox_core::config::Config;
use tagbox_core::kv;
use tokio::net::TcpListener;
use tokio_util::task::TaskTracker;
use url::Url;

use crate::bot::queue::{dispatch_update, new_chat_queues};
use crate::ingest::AccessPolicy;
use crate::replies::Outbox;
use crate::telegram::{TelegramClient, TelegramSettings, resolve_bot_token, resolve_webhook_secret};

pub mod album;
pub mod bot;
pub mod commands;
pub mod handlers;
pub mod ingest;
pub mod markup;
pub mod replies;
pub mod server;
pub mod tags;
pub mod telegram;

#[cfg(test)]
mod testing;

pub use bot::BotContext;
pub use handlers::{Outcome, handle_update};

const POLL_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

struct Runtime {
    client: TelegramClient,
    context: Arc<BotContext>,
    tracker: TaskTracker,
    webhook_secret: Option<String>,
    grace: Duration,
}

fn build_runtime(config: &Config) -> Result<Runtime> {
    let settings = TelegramSettings::from_config(config)?;
    let client = TelegramClient::new(settings.bot_token);
    let tracker = TaskTracker::new();
    let outbox: Arc<dyn Outbox> = Arc::new(client.clone());

    tracing::info!(
        users = settings.allowlist_user_ids.len(),
        chats = settings.allowlist_chat_ids.len(),
        backend = ?config.storage.backend,
        "tagbox bot configured"
    );
    let context = Arc::new(BotContext::new(
        kv::open(&config.storage),
        outbox,
        AccessPolicy::new(settings.allowlist_user_ids, settings.allowlist_chat_ids),
        config.ingest.clone(),
        tracker.clone(),
    ));

    Ok(Runtime {
        client,
        context,
        tracker,
        webhook_secret: settings.webhook_secret,
        grace: config.ingest.shutdown_grace(),
    })
}

/// Waits for in-flight work (queued updates, pending album checks) up to
/// `grace`. Albums still pending after that expire from the store.
async fn drain(tracker: TaskTracker, grace: Duration) {
    tracker.close();
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        tracing::warn!(
            pending = tracker.len(),
            "shutdown grace period elapsed with work still pending"
        );
    }
}

/// Long-polls `getUpdates` until ctrl-c.
///
/// # Errors
/// Returns an error if the configuration is incomplete.
pub async fn run_polling(config: Config) -> Result<()> {
    let Runtime {
        client,
        context,
        tracker,
        grace,
        ..
    } = build_runtime(&config)?;
    let chat_queues = new_chat_queues();

    let mut offset: Option<i64> = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("polling for updates");
    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
            updates = client.get_updates(current_offset, POLL_TIMEOUT) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "telegram polling error");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                if !updates.is_empty() {
                    tracing::debug!(count = updates.len(), "received updates");
                }
                for update in updates {
                    offset = Some(update.update_id + 1);
                    dispatch_update(&chat_queues, &context, &tracker, update).await;
                }
            }
        }
    }

    // Closing the queues lets the workers finish what they hold and exit.
    chat_queues.lock().await.clear();
    drain(tracker, grace).await;
    Ok(())
}

/// Serves the webhook endpoint on `config.server.bind` until ctrl-c.
///
/// # Errors
/// Returns an error if the configuration is incomplete or the listener
/// cannot be bound.
pub async fn run_webhook(config: Config) -> Result<()> {
    let Runtime {
        context,
        tracker,
        webhook_secret,
        grace,
        ..
    } = build_runtime(&config)?;
    if webhook_secret.is_none() {
        tracing::error!(
            "telegram.webhook_secret is not set; every delivery will be refused"
        );
    }

    let bind = config.server.bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind webhook listener on {bind}"))?;
    let app = server::router(context, webhook_secret, &config.server.webhook_path);

    tracing::info!(%bind, path = %config.server.webhook_path, "webhook server listening");
    server::serve(listener, app, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
        }
        tracing::info!("shutting down");
    })
    .await?;

    drain(tracker, grace).await;
    Ok(())
}

/// Registers `url` as the bot's webhook with the configured secret.
///
/// # Errors
/// Returns an error if the token or secret is missing or Telegram rejects
/// the request.
pub async fn set_webhook(config: &Config, url: &Url) -> Result<()> {
    let token = resolve_bot_token(config)?;
    let Some(secret) = resolve_webhook_secret(config) else {
        bail!("telegram.webhook_secret or TAGBOX_WEBHOOK_SECRET is required to register a webhook");
    };
    if url.scheme() != "https" {
        bail!("webhook URL must use https, got '{url}'");
    }
    TelegramClient::new(token)
        .set_webhook(url.as_str(), Some(&secret))
        .await
        .context("setWebhook failed")?;
    tracing::info!(%url, "webhook registered");
    Ok(())
}

/// Removes the bot's webhook so polling can be used again.
///
/// # Errors
/// Returns an error if the token is missing or Telegram rejects the request.
pub async fn delete_webhook(config: &Config) -> Result<()> {
    let token = resolve_bot_token(config)?;
    TelegramClient::new(token)
        .delete_webhook()
        .await
        .context("deleteWebhook failed")?;
    tracing::info!("webhook removed");
    Ok(())
}
