//! Webhook registration.

use anyhow::Result;
use tagbox_core::config::Config;
use url::Url;

pub async fn set(config: &Config, url: &Url) -> Result<()> {
    tagbox_bot::set_webhook(config, url).await?;
    println!("Webhook set to {url}");
    Ok(())
}

pub async fn delete(config: &Config) -> Result<()> {
    tagbox_bot::delete_webhook(config).await?;
    println!("Webhook deleted.");
    Ok(())
}
