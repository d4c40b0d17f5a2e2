//! Ingestion runners.

use anyhow::Result;
use tagbox_core::config::{Config, paths};

fn announce(config: &Config) {
    let config_path = paths::config_path();
    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "using config file");
    }
    tracing::info!(
        users = ?config.telegram.allowlist_user_ids,
        chats = ?config.telegram.allowlist_chat_ids,
        "allowlists"
    );
}

pub async fn polling(config: Config) -> Result<()> {
    announce(&config);
    tagbox_bot::run_polling(config).await
}

pub async fn serve(config: Config) -> Result<()> {
    announce(&config);
    tagbox_bot::run_webhook(config).await
}
