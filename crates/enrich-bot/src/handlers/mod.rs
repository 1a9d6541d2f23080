pub(crate) mod callback;
pub(crate) mod message;

use anyhow::Result;
use enrich_core::ids::ChatId;
use tracing::warn;

use crate::bot::BotContext;
use crate::menus::{self, Menu};

pub(crate) async fn send_menu(
    context: &BotContext,
    chat_id: ChatId,
    menu: &Menu,
    reply_to_message_id: Option<i64>,
) -> Result<()> {
    context
        .client()
        .send_message(
            chat_id,
            &menu.text,
            reply_to_message_id,
            menu.markup().as_ref(),
        )
        .await?;
    Ok(())
}

pub(crate) async fn edit_menu(
    context: &BotContext,
    chat_id: ChatId,
    message_id: i64,
    menu: &Menu,
) -> Result<()> {
    context
        .client()
        .edit_message_text(chat_id, message_id, &menu.text, menu.markup().as_ref())
        .await
}

/// Tells the session's chat that every item has been labeled.
pub(crate) async fn announce_completion(context: &BotContext, chat_id: ChatId, name: &str) {
    if let Err(err) = send_menu(context, chat_id, &menus::session_complete(name), None).await {
        warn!(chat = chat_id, error = %err, "Failed to announce session completion");
    }
}
