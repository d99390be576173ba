use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use vkbot_api::{Identity, VkApiClient};
use vkbot_core::{init_tracing, AccountMode, RemoteApi};

use crate::bot::VkBot;
use crate::config::BotConfig;
use crate::handlers;

/// Builds the bot with the demo handler set and an error callback that logs.
pub fn build_bot(config: &BotConfig, api: Arc<dyn RemoteApi>, account_mode: AccountMode) -> VkBot {
    VkBot::builder(api, account_mode)
        .session_settings(config.session_settings(account_mode))
        .settings(config.bot_settings())
        .handle_message("/ping", handlers::ping)
        .handle_message("/help", handlers::help)
        .handle_error(|message, err| {
            error!(
                message_id = ?message.map(|m| m.id),
                peer_id = ?message.map(|m| m.peer_id),
                error = %err,
                "Bot error"
            );
        })
        .build()
}

/// Asks the remote who the token belongs to.
pub async fn detect_identity(config: &BotConfig) -> Result<(VkApiClient, Identity)> {
    let mut client = VkApiClient::new(config.api_config())?;
    let identity = client.detect_identity().await?;
    Ok((client, identity))
}

/// Main entry: validate config, init logging, detect the account mode, then run until Ctrl-C.
#[instrument(skip(config))]
pub async fn run_bot(config: BotConfig) -> Result<()> {
    config.validate()?;
    init_tracing(&config.log_file)?;

    let (client, identity) = detect_identity(&config).await?;
    info!(
        account_mode = %identity.mode,
        id = identity.id,
        api_url = %config.api_url,
        "Initializing bot"
    );

    let api: Arc<dyn RemoteApi> = Arc::new(client);
    let mut bot = build_bot(&config, api, identity.mode);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            if shutdown_tx.send(true).is_err() {
                warn!("Bot already stopped");
            }
        }
    });

    info!("Bot started successfully");
    bot.start(shutdown_rx).await?;
    Ok(())
}

/// Prints the detected account mode and id.
pub async fn whoami(config: BotConfig) -> Result<()> {
    config.validate()?;
    let (_, identity) = detect_identity(&config).await?;
    println!("{} {}", identity.mode, identity.id);
    Ok(())
}
