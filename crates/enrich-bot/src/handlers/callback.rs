use anyhow::Result;
use enrich_core::ids::MessageHandle;
use enrich_core::keyboard::Callback;
use enrich_core::session::SessionEvent;
use tracing::{debug, error, info, warn};

use crate::bot::context::BotContext;
use crate::handlers::{announce_completion, edit_menu, send_menu};
use crate::menus::{self, Menu, MenuAction};
use crate::registry::{SharedSession, summary_of};
use crate::telegram::CallbackQuery;

const NOT_UNDERSTOOD: &str = "Not understood. This button may be out of date.";
const FAILED: &str = "Something went wrong, please try again.";
const SAVED_NOT_REFILLED: &str = "Saved. The next item could not be posted yet.";

/// Handles one button press. The callback query is always answered.
pub(crate) async fn handle_callback(context: &BotContext, query: CallbackQuery) -> Result<()> {
    let data = query.data.clone().unwrap_or_default();
    let notice = if let Ok(callback) = Callback::parse(&data) {
        handle_session_button(context, callback).await
    } else if let Some(action) = MenuAction::parse(&data) {
        match handle_menu_action(context, &query, action).await {
            Ok(()) => None,
            Err(err) => {
                warn!(data = %data, error = %format!("{err:#}"), "Menu update failed");
                Some(FAILED)
            }
        }
    } else {
        debug!(data = %data, "Unknown callback data");
        if let Some(message) = query.message.as_ref()
            && let Err(err) = edit_menu(
                context,
                message.chat.id,
                message.message_id,
                &menus::unknown(&data),
            )
            .await
        {
            warn!(error = %err, "Failed to show unknown-callback menu");
        }
        Some(NOT_UNDERSTOOD)
    };

    context
        .client()
        .answer_callback_query(&query.id, notice)
        .await
}

/// Routes an `enrich:` payload to its session. Returns the notice to show
/// on the callback answer, if any.
async fn handle_session_button(context: &BotContext, callback: Callback) -> Option<&'static str> {
    let Some(shared) = context.registry().get(callback.session()).await else {
        debug!(session = %callback.session(), "Button for a deleted session");
        return Some(NOT_UNDERSTOOD);
    };
    let mut session = shared.lock().await;
    let result = session
        .dispatch(context.client(), SessionEvent::Button(callback))
        .await;
    if let Err(err) = context.registry().persist(&session).await {
        error!(session = %session.id(), error = %format!("{err:#}"), "Failed to persist session");
        return Some(FAILED);
    }

    match result {
        Ok(report) => {
            if report.completed {
                announce_completion(context, session.chat_id(), session.name()).await;
            }
            report.refill_error.is_some().then_some(SAVED_NOT_REFILLED)
        }
        Err(err) if err.is_unrecognized() => {
            debug!(session = %session.id(), error = %err, "Ignoring stale or foreign button");
            Some(NOT_UNDERSTOOD)
        }
        Err(err) => {
            warn!(session = %session.id(), error = %err, "Button handling failed");
            Some(FAILED)
        }
    }
}

async fn handle_menu_action(
    context: &BotContext,
    query: &CallbackQuery,
    action: MenuAction,
) -> Result<()> {
    let registry = context.registry();
    let menu = match action {
        MenuAction::Root => menus::root(&registry.summaries().await),
        MenuAction::StartPicker => menus::start_picker(&registry.summaries().await),
        MenuAction::LivePicker => menus::live_picker(&registry.summaries().await),
        MenuAction::StopPicker => menus::stop_picker(&registry.summaries().await),
        MenuAction::DeletePicker => menus::delete_picker(&registry.summaries().await),
        MenuAction::Start(raw) => match registry.resolve(&raw).await {
            Some((_, shared)) => start_session(context, &shared).await?,
            None => menus::no_matching_session(&raw),
        },
        MenuAction::Live(raw) => match registry.resolve(&raw).await {
            Some((_, shared)) => go_live(context, &shared).await?,
            None => menus::no_matching_session(&raw),
        },
        MenuAction::Stop(raw) => match registry.resolve(&raw).await {
            Some((_, shared)) => {
                let pressed_on_item = {
                    let session = shared.lock().await;
                    query
                        .message
                        .as_ref()
                        .is_some_and(|m| session.owns_message(MessageHandle(m.message_id)))
                };
                let menu = stop_session(context, &shared).await?;
                // The pressed message was an item post and is gone now.
                if pressed_on_item && let Some(message) = query.message.as_ref() {
                    send_menu(context, message.chat.id, &menu, None).await?;
                    return Ok(());
                }
                menu
            }
            None => menus::no_matching_session(&raw),
        },
        MenuAction::Delete(raw) => match registry.resolve(&raw).await {
            Some((_, shared)) => menus::delete_confirm(&summary_of(&*shared.lock().await)),
            None => menus::no_matching_session(&raw),
        },
        MenuAction::DeleteConfirmed(raw) => match registry.resolve(&raw).await {
            Some((id, shared)) => {
                shared.lock().await.stop(context.client()).await;
                registry.remove(id).await?;
                menus::deleted()
            }
            None => menus::no_matching_session(&raw),
        },
    };

    match query.message.as_ref() {
        Some(message) => edit_menu(context, message.chat.id, message.message_id, &menu).await,
        None => send_menu(context, query.from.id, &menu, None).await,
    }
}

async fn start_session(context: &BotContext, shared: &SharedSession) -> Result<Menu> {
    let mut session = shared.lock().await;
    let result = session.start(context.client()).await;
    context.registry().persist(&session).await?;
    let menu = match result {
        Ok(report) => {
            info!(session = %session.id(), posted = report.posted, "Started session from menu");
            if report.completed {
                announce_completion(context, session.chat_id(), session.name()).await;
            }
            menus::started(session.name())
        }
        Err(err) => {
            warn!(session = %session.id(), error = %err, "Failed to start session");
            menus::failed("start", session.name())
        }
    };
    Ok(menu)
}

async fn go_live(context: &BotContext, shared: &SharedSession) -> Result<Menu> {
    let mut session = shared.lock().await;
    session.mark_live();
    let result = session.tick(context.client()).await;
    context.registry().persist(&session).await?;
    let menu = match result {
        Ok(_) => menus::gone_live(session.name()),
        Err(err) => {
            warn!(session = %session.id(), error = %err, "Failed to fill live session");
            menus::failed("fill", session.name())
        }
    };
    Ok(menu)
}

async fn stop_session(context: &BotContext, shared: &SharedSession) -> Result<Menu> {
    let mut session = shared.lock().await;
    let closed = session.stop(context.client()).await;
    context.registry().persist(&session).await?;
    info!(session = %session.id(), closed, "Stopped session from menu");
    Ok(menus::stopped())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use enrich_core::config::{ItemOrder, SessionConfig};
    use enrich_core::keyboard::GridShape;
    use enrich_core::labels::OutputSpec;
    use enrich_core::source::SourceSpec;
    use serde_json::json;
    use tempfile::tempdir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::registry::SessionRegistry;
    use crate::telegram::TelegramClient;

    #[tokio::test]
    async fn state_write_failure_is_answered_as_failed() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("sessions.json");
        let config = SessionConfig {
            name: "animals".to_string(),
            chat_id: 42,
            batch_size: 1,
            order: ItemOrder::Sequential,
            allow_new_labels: false,
            auto_sort_labels: false,
            multi_select: false,
            labels: vec!["cat".to_string()],
            grid: GridShape::default(),
            source: SourceSpec::Directory {
                path: dir.path().join("items"),
            },
            output: Some(OutputSpec {
                path: dir.path().join("labels.json"),
            }),
        };
        let registry = SessionRegistry::open(&[config], &state_path).unwrap();
        std::fs::create_dir(state_path.with_extension("json.tmp")).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTEST/answerCallbackQuery"))
            .and(body_partial_json(json!({
                "callback_query_id": "q1",
                "text": FAILED
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let context = BotContext::new(
            TelegramClient::with_base_url("TEST".to_string(), &server.uri()),
            registry,
            HashSet::from([7]),
            HashSet::new(),
        );
        let query: CallbackQuery = serde_json::from_value(json!({
            "id": "q1",
            "from": { "id": 7 },
            "data": "enrich:0:0:0",
        }))
        .unwrap();

        handle_callback(&context, query).await.unwrap();
    }
}
