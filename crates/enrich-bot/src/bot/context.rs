use std::collections::HashSet;

use crate::registry::SessionRegistry;
use crate::telegram::TelegramClient;

pub(crate) struct BotContext {
    client: TelegramClient,
    registry: SessionRegistry,
    allowlist_user_ids: HashSet<i64>,
    allowlist_chat_ids: HashSet<i64>,
}

impl BotContext {
    pub(crate) fn new(
        client: TelegramClient,
        registry: SessionRegistry,
        allowlist_user_ids: HashSet<i64>,
        allowlist_chat_ids: HashSet<i64>,
    ) -> Self {
        Self {
            client,
            registry,
            allowlist_user_ids,
            allowlist_chat_ids,
        }
    }

    pub(crate) fn client(&self) -> &TelegramClient {
        &self.client
    }

    pub(crate) fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub(crate) fn is_allowed_user(&self, user_id: i64) -> bool {
        self.allowlist_user_ids.contains(&user_id)
    }

    pub(crate) fn is_allowed_chat(&self, chat_id: i64) -> bool {
        self.allowlist_chat_ids.contains(&chat_id)
    }
}
