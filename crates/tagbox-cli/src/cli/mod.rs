//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use tagbox_core::{config, telemetry};
use url::Url;

mod commands;

#[derive(Parser)]
#[command(name = "tagbox")]
#[command(version)]
#[command(about = "Save Telegram messages, channel posts and albums as tagged records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the Telegram bot (long-polling)
    Bot,
    /// Serve the Telegram webhook endpoint
    Serve,
    /// Register or remove the Telegram webhook
    Webhook {
        #[command(subcommand)]
        command: WebhookCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum WebhookCommands {
    /// Point Telegram at a public HTTPS URL
    Set {
        /// Full webhook URL, including the configured webhook path
        #[arg(value_name = "URL")]
        url: Url,
    },
    /// Remove the webhook so long-polling works again
    Delete,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Config commands never touch the network or the store.
    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        };
    }

    let config = config::Config::load().context("load config")?;
    telemetry::init(&config.logging).context("init logging")?;

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
    rt.block_on(async move { dispatch(cli.command, config).await })
}

async fn dispatch(command: Commands, config: config::Config) -> Result<()> {
    match command {
        Commands::Bot => commands::bot::polling(config).await,
        Commands::Serve => commands::bot::serve(config).await,
        Commands::Webhook { command } => match command {
            WebhookCommands::Set { url } => commands::webhook::set(&config, &url).await,
            WebhookCommands::Delete => commands::webhook::delete(&config).await,
        },
        Commands::Config { .. } => Ok(()),
    }
}
