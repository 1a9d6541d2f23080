use anyhow::Result;
use enrich_core::SessionError;
use enrich_core::ids::{MessageHandle, SessionId};
use enrich_core::session::SessionEvent;
use tracing::{debug, info, warn};

use crate::bot::context::BotContext;
use crate::commands::{BotCommand, parse_command};
use crate::handlers::{announce_completion, send_menu};
use crate::menus;
use crate::telegram::Message;

pub(crate) async fn handle_message(context: &BotContext, message: Message) -> Result<()> {
    let Some(text) = message.text.as_deref() else {
        debug!(chat = message.chat.id, "Ignoring message without text");
        return Ok(());
    };

    if let Some(replied) = message.reply_to_message.as_deref()
        && let Some(owner) = context
            .registry()
            .owner_of_message(message.chat.id, MessageHandle(replied.message_id))
            .await
    {
        return handle_reply(context, &message, owner, replied.message_id, text).await;
    }

    match parse_command(text) {
        Some(BotCommand::Menu) => {
            let menu = menus::root(&context.registry().summaries().await);
            send_menu(context, message.chat.id, &menu, Some(message.message_id)).await
        }
        Some(BotCommand::Status) => {
            let menu = menus::status(&context.registry().progress().await);
            send_menu(context, message.chat.id, &menu, Some(message.message_id)).await
        }
        None => {
            debug!(chat = message.chat.id, "Ignoring message that is neither a command nor a reply");
            Ok(())
        }
    }
}

/// A text reply to an item post: coins (or reuses) a label for that item.
async fn handle_reply(
    context: &BotContext,
    message: &Message,
    owner: SessionId,
    reply_to: i64,
    text: &str,
) -> Result<()> {
    let Some(shared) = context.registry().get(owner).await else {
        return Ok(());
    };
    let mut session = shared.lock().await;
    let event = SessionEvent::Reply {
        reply_to: MessageHandle(reply_to),
        text: text.to_string(),
    };
    let result = session.dispatch(context.client(), event).await;
    let result = match context.registry().persist(&session).await {
        Ok(()) => result.map_err(anyhow::Error::from),
        Err(err) => Err(err),
    };

    match result {
        Ok(report) => {
            if let Some(label) = report.new_label.as_deref() {
                info!(session = %session.id(), label = %label, "Added option from reply");
                let menu = menus::added_option(session.name(), label);
                send_menu(context, message.chat.id, &menu, Some(message.message_id)).await?;
            }
            if report.completed {
                announce_completion(context, session.chat_id(), session.name()).await;
            }
            Ok(())
        }
        Err(err)
            if err
                .downcast_ref::<SessionError>()
                .is_some_and(SessionError::is_unrecognized) =>
        {
            debug!(session = %session.id(), error = %err, "Reply no longer matches an open item");
            Ok(())
        }
        Err(err) => {
            warn!(session = %session.id(), error = %format!("{err:#}"), "Reply handling failed");
            let _ = context
                .client()
                .send_message(
                    message.chat.id,
                    "Sorry, something went wrong.",
                    Some(message.message_id),
                    None,
                )
                .await;
            Ok(())
        }
    }
}
