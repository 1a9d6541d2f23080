use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use enrich_core::DeliveryError;
use enrich_core::config::TelegramConfig;
use enrich_core::ids::{ChatId, MessageHandle};
use enrich_core::keyboard::Keyboard;
use enrich_core::source::ItemContent;
use enrich_core::transport::{ChatTransport, TransportFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

mod types;

pub use types::{
    CallbackQuery, Chat, InlineKeyboardButton, InlineKeyboardMarkup, Message, Update, User,
};

use crate::commands::TelegramCommandSpec;

const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
/// Telegram refuses edits that would leave the message unchanged.
const NOT_MODIFIED: &str = "message is not modified";

pub struct TelegramSettings {
    pub bot_token: String,
    pub allowlist_user_ids: HashSet<i64>,
    pub allowlist_chat_ids: HashSet<i64>,
}

impl TelegramSettings {
    ///
    /// # Errors
    /// Returns an error if no token is configured or the user allowlist is
    /// empty.
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let token = config
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .or_else(|| {
                std::env::var("ENRICH_TELEGRAM_BOT_TOKEN")
                    .ok()
                    .map(|token| token.trim().to_string())
                    .filter(|token| !token.is_empty())
            })
            .unwrap_or_default();
        if token.is_empty() {
            bail!("telegram.bot_token or ENRICH_TELEGRAM_BOT_TOKEN is required");
        }

        let allowlist_user_ids: HashSet<i64> = config.allowlist_user_ids.iter().copied().collect();
        if allowlist_user_ids.is_empty() {
            bail!("telegram.allowlist_user_ids must contain at least one user ID");
        }

        Ok(Self {
            bot_token: token,
            allowlist_user_ids,
            allowlist_chat_ids: config.allowlist_chat_ids.iter().copied().collect(),
        })
    }
}

/// How a file item is uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Photo,
    Animation,
    Document,
}

impl MediaKind {
    fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Animation => "sendAnimation",
            Self::Document => "sendDocument",
        }
    }

    fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Animation => "animation",
            Self::Document => "document",
        }
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url(token, DEFAULT_BASE_URL)
    }

    /// Client against a different API host (a local Bot API server or a mock).
    pub fn with_base_url(token: String, base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: Some(vec!["message", "callback_query"]),
        };
        self.post("getUpdates", &request).await
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message> {
        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id,
            allow_sending_without_reply: reply_to_message_id.map(|_| true),
            reply_markup: keyboard,
        };
        self.post("sendMessage", &request).await
    }

    /// Uploads a local file with an inline keyboard attached.
    async fn send_media(
        &self,
        kind: MediaKind,
        chat_id: i64,
        path: &Path,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<Message> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("item")
            .to_string();
        let markup = serde_json::to_string(keyboard).context("Failed to encode reply markup")?;

        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("reply_markup", markup)
            .part(
                kind.field(),
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .http
            .post(self.method_url(kind.method()))
            .multipart(form)
            .send()
            .await
            .map_err(|_| anyhow!("Telegram upload failed"))?;
        decode_response(response).await
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    /// An edit that changes nothing is not an error.
    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<()> {
        let request = EditMessageTextRequest {
            chat_id,
            message_id,
            text,
            reply_markup: keyboard,
        };
        let result: Result<serde_json::Value> = self.post("editMessageText", &request).await;
        ignore_not_modified(result)
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    /// An edit that changes nothing is not an error.
    pub async fn edit_message_reply_markup(
        &self,
        chat_id: i64,
        message_id: i64,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        let request = EditReplyMarkupRequest {
            chat_id,
            message_id,
            reply_markup: keyboard,
        };
        let result: Result<serde_json::Value> =
            self.post("editMessageReplyMarkup", &request).await;
        ignore_not_modified(result)
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let request = MessageRef {
            chat_id,
            message_id,
        };
        let _: bool = self.post("deleteMessage", &request).await?;
        Ok(())
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<()> {
        let request = AnswerCallbackQueryRequest {
            callback_query_id,
            text,
        };
        let _: bool = self.post("answerCallbackQuery", &request).await?;
        Ok(())
    }

    ///
    /// # Errors
    /// Returns an error if the request fails or Telegram reports `ok=false`.
    pub async fn set_my_commands(&self, commands: &[TelegramCommandSpec]) -> Result<()> {
        let request = SetMyCommandsRequest {
            commands: commands
                .iter()
                .map(|spec| BotCommandEntry {
                    command: spec.command,
                    description: spec.description,
                })
                .collect(),
        };
        let _: bool = self.post("setMyCommands", &request).await?;
        Ok(())
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(&self, method: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|_| anyhow!("Telegram request failed"))?;
        decode_response(response).await
    }
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let payload: TelegramResponse<T> = response
        .json()
        .await
        .map_err(|_| anyhow!("Failed to decode Telegram response"))?;

    if !payload.ok {
        let description = payload
            .description
            .unwrap_or_else(|| "Telegram API error".to_string());
        bail!("{}", description);
    }

    payload
        .result
        .ok_or_else(|| anyhow!("Telegram response is missing a result"))
}

fn ignore_not_modified(result: Result<serde_json::Value>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.to_string().contains(NOT_MODIFIED) => Ok(()),
        Err(err) => Err(err),
    }
}

fn delivery_error(err: &anyhow::Error) -> DeliveryError {
    DeliveryError::new(format!("{err:#}"))
}

impl ChatTransport for TelegramClient {
    fn post<'a>(
        &'a self,
        chat: ChatId,
        content: &'a ItemContent,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, MessageHandle> {
        Box::pin(async move {
            let markup = InlineKeyboardMarkup::from(keyboard);
            let sent = match content {
                ItemContent::Text(text) => self.send_message(chat, text, None, Some(&markup)).await,
                ItemContent::Image(path) => {
                    self.send_media(MediaKind::Photo, chat, path, &markup).await
                }
                ItemContent::Animation(path) => {
                    self.send_media(MediaKind::Animation, chat, path, &markup)
                        .await
                }
                ItemContent::Document(path) => {
                    self.send_media(MediaKind::Document, chat, path, &markup)
                        .await
                }
            };
            sent.map(|message| MessageHandle(message.message_id))
                .map_err(|err| delivery_error(&err))
        })
    }

    fn edit_keyboard<'a>(
        &'a self,
        chat: ChatId,
        message: MessageHandle,
        keyboard: &'a Keyboard,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let markup = InlineKeyboardMarkup::from(keyboard);
            self.edit_message_reply_markup(chat, message.get(), &markup)
                .await
                .map_err(|err| delivery_error(&err))
        })
    }

    fn delete(&self, chat: ChatId, message: MessageHandle) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.delete_message(chat, message.get())
                .await
                .map_err(|err| delivery_error(&err))
        })
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_updates: Option<Vec<&'static str>>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allow_sending_without_reply: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditMessageTextRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Debug, Serialize)]
struct EditReplyMarkupRequest<'a> {
    chat_id: i64,
    message_id: i64,
    reply_markup: &'a InlineKeyboardMarkup,
}

#[derive(Debug, Serialize)]
struct MessageRef {
    chat_id: i64,
    message_id: i64,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQueryRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SetMyCommandsRequest {
    commands: Vec<BotCommandEntry>,
}

#[derive(Debug, Serialize)]
struct BotCommandEntry {
    command: &'static str,
    description: &'static str,
}

#[cfg(test)]
mod tests {
    use enrich_core::keyboard::Button;

    use super::*;

    #[test]
    fn settings_require_token_and_allowlist() {
        let config = TelegramConfig {
            bot_token: Some("  token  ".to_string()),
            allowlist_user_ids: vec![7],
            allowlist_chat_ids: vec![-100],
        };
        let settings = TelegramSettings::from_config(&config).unwrap();
        assert_eq!(settings.bot_token, "token");
        assert!(settings.allowlist_user_ids.contains(&7));
        assert!(settings.allowlist_chat_ids.contains(&-100));

        let no_users = TelegramConfig {
            allowlist_user_ids: Vec::new(),
            ..config
        };
        assert!(TelegramSettings::from_config(&no_users).is_err());
    }

    #[test]
    fn not_modified_edits_are_success() {
        assert!(ignore_not_modified(Err(anyhow!(
            "Bad Request: message is not modified: specified new message content is the same"
        )))
        .is_ok());
        assert!(ignore_not_modified(Err(anyhow!("Bad Request: message to edit not found"))).is_err());
    }

    #[test]
    fn keyboard_converts_to_inline_markup() {
        let keyboard = Keyboard {
            rows: vec![vec![
                Button::new("cat", "enrich:1:2:3"),
                Button::new("dog", "enrich:1:2:4"),
            ]],
        };
        let markup = InlineKeyboardMarkup::from(&keyboard);
        let json = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            json["inline_keyboard"][0][1],
            serde_json::json!({ "text": "dog", "callback_data": "enrich:1:2:4" })
        );
    }
}
