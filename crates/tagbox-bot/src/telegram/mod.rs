use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tagbox_core::config::Config;

mod types;

pub use types::{
    Audio, Chat, Document, Message, MessageEntity, MessageOrigin, PhotoSize, Sticker, Update,
    User, Video, Voice,
};

/// Update kinds the bot subscribes to, for both polling and webhooks.
pub const ALLOWED_UPDATES: &[&str] = &[
    "message",
    "edited_message",
    "channel_post",
    "edited_channel_post",
];

pub const PARSE_MODE_MARKDOWN_V2: &str = "MarkdownV2";

pub struct TelegramSettings {
    pub bot_token: String,
    pub allowlist_user_ids: HashSet<i64>,
    pub allowlist_chat_ids: HashSet<i64>,
    pub webhook_secret: Option<String>,
}

impl TelegramSettings {
    /// # Errors
    /// Returns an error if no bot token is configured or both allowlists are empty.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = resolve_bot_token(config)?;

        let allowlist_user_ids: HashSet<i64> =
            config.telegram.allowlist_user_ids.iter().copied().collect();
        let allowlist_chat_ids: HashSet<i64> =
            config.telegram.allowlist_chat_ids.iter().copied().collect();
        if allowlist_user_ids.is_empty() && allowlist_chat_ids.is_empty() {
            bail!(
                "telegram.allowlist_user_ids or telegram.allowlist_chat_ids must contain at least one ID"
            );
        }

        Ok(Self {
            bot_token: token,
            allowlist_user_ids,
            allowlist_chat_ids,
            webhook_secret: resolve_webhook_secret(config),
        })
    }
}

/// Config value first, then `TAGBOX_TELEGRAM_BOT_TOKEN`.
///
/// # Errors
/// Returns an error if neither is set.
pub fn resolve_bot_token(config: &Config) -> Result<String> {
    normalize_optional(config.telegram.bot_token.as_deref())
        .or_else(|| normalize_optional(std::env::var("TAGBOX_TELEGRAM_BOT_TOKEN").ok().as_deref()))
        .ok_or_else(|| anyhow!("telegram.bot_token or TAGBOX_TELEGRAM_BOT_TOKEN is required"))
}

/// Config value first, then `TAGBOX_WEBHOOK_SECRET`.
pub fn resolve_webhook_secret(config: &Config) -> Option<String> {
    normalize_optional(config.telegram.webhook_secret.as_deref())
        .or_else(|| normalize_optional(std::env::var("TAGBOX_WEBHOOK_SECRET").ok().as_deref()))
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, "https://api.telegram.org")
    }

    /// Points the client at a different Bot API server.
    pub fn with_base_url(token: String, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: Some(ALLOWED_UPDATES),
        };
        self.post("getUpdates", &request).await
    }

    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        parse_mode: Option<&str>,
    ) -> Result<()> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id,
            allow_sending_without_reply: reply_to_message_id.map(|_| true),
            parse_mode,
        };
        let _: Message = self.post("sendMessage", &request).await?;
        Ok(())
    }

    /// Registers `url` as the webhook; Telegram echoes `secret_token` in the
    /// `X-Telegram-Bot-Api-Secret-Token` header of every delivery.
    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let request = SetWebhookRequest {
            url,
            secret_token,
            allowed_updates: ALLOWED_UPDATES,
        };
        let _: bool = self.post("setWebhook", &request).await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the request fails or Telegram rejects it.
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self
            .post("deleteWebhook", &DeleteWebhookRequest {})
            .await?;
        Ok(())
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, method: &str, body: &B) -> Result<T> {
        let url = format!("{}/bot{}/{}", self.base_url, self.token, method);
        // reqwest errors embed the URL, which contains the token.
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| anyhow!("Telegram {method} request failed: {}", err.without_url()))?;

        let payload: TelegramResponse<T> = response.json().await.map_err(|err| {
            anyhow!(
                "Failed to decode Telegram {method} response: {}",
                err.without_url()
            )
        })?;

        if !payload.ok {
            let description = payload
                .description
                .unwrap_or_else(|| "Telegram API error".to_string());
            bail!("{method}: {description}");
        }

        payload
            .result
            .ok_or_else(|| anyhow!("Telegram {method} response missing result"))
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_updates: Option<&'static [&'static str]>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_sending_without_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SetWebhookRequest<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
struct DeleteWebhookRequest {}
