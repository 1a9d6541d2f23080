use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use enrich_core::config::Config;
use tracing::{debug, info, warn};

use crate::bot::{BotContext, dispatch_update, new_queues, tick_live_sessions};
use crate::registry::SessionRegistry;
use crate::telegram::{TelegramClient, TelegramSettings};

mod bot;
mod commands;
mod handlers;
pub mod logging;
mod menus;
mod registry;
pub mod telegram;

/// Loads the default config and runs the bot until Ctrl-C.
///
/// # Errors
/// Returns an error if the config, the Telegram settings or the session
/// state cannot be loaded.
pub async fn run() -> Result<()> {
    let config = Config::load().context("load config")?;
    run_with_config(config).await
}

///
/// # Errors
/// Returns an error if the Telegram settings or the session state cannot be
/// loaded.
pub async fn run_with_config(config: Config) -> Result<()> {
    let settings = TelegramSettings::from_config(&config.telegram)?;
    let config_path = enrich_core::config::paths::config_path();
    if config_path.exists() {
        info!(path = %config_path.display(), "Using config file");
    }
    info!(
        sessions = config.sessions.len(),
        users = ?settings.allowlist_user_ids,
        chats = ?settings.allowlist_chat_ids,
        "Loaded configuration"
    );
    run_bot(config, settings).await
}

async fn run_bot(config: Config, settings: TelegramSettings) -> Result<()> {
    let client = TelegramClient::new(settings.bot_token);
    let state_path = config.state_path();
    let registry = SessionRegistry::open(&config.sessions, &state_path)
        .with_context(|| format!("open session state at {}", state_path.display()))?;

    if let Err(err) = client
        .set_my_commands(&commands::telegram_command_specs())
        .await
    {
        warn!(error = %err, "Failed to register bot commands");
    }

    let context = Arc::new(BotContext::new(
        client.clone(),
        registry,
        settings.allowlist_user_ids,
        settings.allowlist_chat_ids,
    ));
    let queues = new_queues();

    let mut offset: Option<i64> = None;
    let poll_timeout = config.bot.poll_timeout();
    let mut live_tick = tokio::time::interval(config.bot.live_tick());
    live_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("enrich bot started. Polling for updates...");

    loop {
        let current_offset = offset;
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down Telegram bot.");
                break;
            }
            _ = live_tick.tick() => {
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    tick_live_sessions(context.as_ref()).await;
                });
            }
            updates = client.get_updates(current_offset, poll_timeout) => {
                let updates = match updates {
                    Ok(updates) => updates,
                    Err(err) => {
                        warn!(error = %err, "Telegram polling error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                if !updates.is_empty() {
                    debug!(count = updates.len(), "Received updates");
                }
                for update in updates {
                    offset = Some(update.update_id + 1);
                    dispatch_update(&queues, &context, update).await;
                }
            }
        }
    }

    Ok(())
}
