//! The chat platform as seen by the session engine.

use std::future::Future;
use std::pin::Pin;

use crate::error::DeliveryError;
use crate::ids::{ChatId, MessageHandle};
use crate::keyboard::Keyboard;
use crate::source::ItemContent;

pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, DeliveryError>> + Send + 'a>>;

/// Sends, edits and deletes item messages.
///
/// Calls are not assumed to be idempotent; the engine never retries them.
pub trait ChatTransport: Send + Sync {
    fn post<'a>(
        &'a self,
        chat: ChatId,
        content: &'a ItemContent,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, MessageHandle>;

    fn edit_keyboard<'a>(
        &'a self,
        chat: ChatId,
        message: MessageHandle,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, ()>;

    fn delete(&self, chat: ChatId, message: MessageHandle) -> TransportFuture<'_, ()>;
}
