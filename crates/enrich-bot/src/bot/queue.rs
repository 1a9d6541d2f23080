use std::collections::HashMap;
use std::sync::Arc;

use enrich_core::ids::{MessageHandle, SessionId};
use enrich_core::keyboard::Callback;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::bot::context::BotContext;
use crate::handlers::callback::handle_callback;
use crate::handlers::message::handle_message;
use crate::menus::MenuAction;
use crate::telegram::{CallbackQuery, Message, Update};

/// Queue key. Events for one session are handled in arrival order; menu
/// traffic is serialized per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum QueueKey {
    Session(SessionId),
    Chat(i64),
}

#[derive(Debug)]
pub(crate) enum Job {
    Message(Message),
    Callback(CallbackQuery),
}

pub(crate) type QueueMap = Arc<Mutex<HashMap<QueueKey, mpsc::UnboundedSender<Job>>>>;

pub(crate) fn new_queues() -> QueueMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Routes one update to the queue of the session (or chat) it concerns.
pub(crate) async fn dispatch_update(queues: &QueueMap, context: &Arc<BotContext>, update: Update) {
    if let Some(message) = update.message {
        if !should_process_message(context, &message) {
            return;
        }
        let key = message_key(context, &message).await;
        enqueue(queues, context, key, Job::Message(message)).await;
    }

    if let Some(query) = update.callback_query {
        if query.from.is_bot || !context.is_allowed_user(query.from.id) {
            warn!(user = query.from.id, "Denied callback from non-allowlisted user");
            let context = Arc::clone(context);
            tokio::spawn(async move {
                let _ = context
                    .client()
                    .answer_callback_query(&query.id, Some("Access denied."))
                    .await;
            });
            return;
        }
        let key = callback_key(&query);
        enqueue(queues, context, key, Job::Callback(query)).await;
    }
}

/// Quick check if message should be processed (allowlist + bot filter).
/// Returns false for messages that should be silently ignored.
fn should_process_message(context: &BotContext, message: &Message) -> bool {
    if message.chat.is_group() && !context.is_allowed_chat(message.chat.id) {
        debug!(chat = message.chat.id, "Ignoring non-allowlisted group chat");
        return false;
    }

    let Some(user) = message.from.as_ref() else {
        debug!(chat = message.chat.id, "Ignoring message without sender");
        return false;
    };

    if user.is_bot {
        return false;
    }

    if !context.is_allowed_user(user.id) {
        warn!(user = user.id, chat = message.chat.id, "Denied user");
        return false;
    }

    true
}

async fn message_key(context: &BotContext, message: &Message) -> QueueKey {
    if let Some(replied) = message.reply_to_message.as_deref()
        && let Some(owner) = context
            .registry()
            .owner_of_message(message.chat.id, MessageHandle(replied.message_id))
            .await
    {
        return QueueKey::Session(owner);
    }
    QueueKey::Chat(message.chat.id)
}

fn callback_key(query: &CallbackQuery) -> QueueKey {
    let data = query.data.as_deref().unwrap_or_default();
    if let Ok(callback) = Callback::parse(data) {
        return QueueKey::Session(callback.session());
    }
    if let Some(id) = MenuAction::parse(data)
        .as_ref()
        .and_then(MenuAction::session_arg)
        .and_then(|raw| raw.parse().ok())
    {
        return QueueKey::Session(SessionId(id));
    }
    let chat = query
        .message
        .as_ref()
        .map_or(query.from.id, |message| message.chat.id);
    QueueKey::Chat(chat)
}

async fn enqueue(queues: &QueueMap, context: &Arc<BotContext>, key: QueueKey, job: Job) {
    let sender = {
        let mut queues = queues.lock().await;
        if let Some(sender) = queues.get(&key) {
            sender.clone()
        } else {
            let (sender, receiver) = mpsc::unbounded_channel();
            spawn_queue_worker(key, receiver, Arc::clone(context));
            queues.insert(key, sender.clone());
            sender
        }
    };

    if let Err(err) = sender.send(job) {
        let job = err.0;
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_queue_worker(key, receiver, Arc::clone(context));
        {
            let mut queues = queues.lock().await;
            queues.insert(key, sender.clone());
        }
        let _ = sender.send(job);
    }
}

fn spawn_queue_worker(
    key: QueueKey,
    mut receiver: mpsc::UnboundedReceiver<Job>,
    context: Arc<BotContext>,
) {
    tokio::spawn(async move {
        while let Some(job) = receiver.recv().await {
            let result = match job {
                Job::Message(message) => handle_message(context.as_ref(), message).await,
                Job::Callback(query) => handle_callback(context.as_ref(), query).await,
            };
            if let Err(err) = result {
                warn!(queue = ?key, error = %format!("{err:#}"), "Update handling failed");
            }
        }
    });
}
