//! Telegram adapter (teloxide).
//!
//! Implements the `b24mon-core` MessagingPort over the Telegram Bot API and
//! hosts the command/callback handlers of the bot.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use b24mon_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Telegram's hard limit for a message body.
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(Bot::new(token))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    /// Retry once on flood control, then hand the raw error back for mapping.
    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!(wait_ms = d.as_millis() as u64, "telegram flood control");
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

/// Map a Bot API failure into the core error taxonomy.
///
/// `chat` is the recipient the request targeted, if any. Without one the
/// recipient-level errors degrade to `External`.
pub fn map_request_error(chat: Option<ChatId>, e: RequestError) -> Error {
    match e {
        RequestError::RetryAfter(d) => Error::Transient {
            message: format!("telegram flood control: retry after {}s", d.as_secs()),
            retry_after: Some(d),
        },
        RequestError::Network(err) => Error::transient(format!("telegram network error: {err}")),
        RequestError::Io(err) => Error::transient(format!("telegram i/o error: {err}")),
        RequestError::MigrateToChatId(to) => match chat {
            Some(from) => Error::ChatMigrated {
                from: from.0,
                to,
            },
            None => Error::External(format!("chat migrated to {}", to)),
        },
        RequestError::Api(api) => match (chat, permanent_reason(&api)) {
            (Some(chat), Some(reason)) => Error::Recipient {
                chat_id: chat.0,
                reason: reason.to_string(),
            },
            _ => Error::External(format!("telegram api error: {api}")),
        },
        other => Error::External(format!("telegram error: {other}")),
    }
}

/// Errors after which the chat will never accept a message from the bot.
fn permanent_reason(api: &ApiError) -> Option<&'static str> {
    let reason = match api {
        ApiError::BotBlocked => "bot was blocked by the user",
        ApiError::ChatNotFound => "chat not found",
        ApiError::UserDeactivated => "user is deactivated",
        ApiError::BotKicked => "bot was kicked from the group",
        ApiError::BotKickedFromSupergroup => "bot was kicked from the supergroup",
        ApiError::CantInitiateConversation => "bot can't initiate conversation",
        ApiError::CantTalkWithBots => "bot can't send messages to bots",
        ApiError::NotEnoughRightsToPostMessages => "not enough rights to post messages",
        ApiError::GroupDeactivated => "group is deactivated",
        _ => return None,
    };
    Some(reason)
}

fn is_not_modified(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::MessageNotModified))
}

pub fn to_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_documents: true,
            supports_inline_keyboards: true,
            max_message_len: TELEGRAM_MAX_MESSAGE_LEN,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await
            .map_err(|e| map_request_error(Some(chat_id), e))?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        let res = self
            .with_retry(|| {
                self.bot
                    .edit_message_text(
                        Self::tg_chat(msg.chat_id),
                        Self::tg_msg_id(msg.message_id),
                        html.to_string(),
                    )
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_request_error(Some(msg.chat_id), e)),
        }
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await
        .map_err(|e| map_request_error(Some(msg.chat_id), e))?;
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = to_markup(&keyboard);

        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
                    .reply_markup(markup.clone())
            })
            .await
            .map_err(|e| map_request_error(Some(chat_id), e))?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        let markup = to_markup(&keyboard);
        let res = self
            .with_retry(|| {
                self.bot
                    .edit_message_text(
                        Self::tg_chat(msg.chat_id),
                        Self::tg_msg_id(msg.message_id),
                        html.to_string(),
                    )
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
                    .reply_markup(markup.clone())
            })
            .await;
        match res {
            Ok(_) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_request_error(Some(msg.chat_id), e)),
        }
    }

    async fn send_document(
        &self,
        chat_id: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                let file = InputFile::memory(bytes.clone()).file_name(file_name.to_string());
                let mut req = self.bot.send_document(Self::tg_chat(chat_id), file);
                if let Some(c) = caption {
                    req = req.caption(c.to_string()).parse_mode(ParseMode::Html);
                }
                req
            })
            .await
            .map_err(|e| map_request_error(Some(chat_id), e))?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await
        .map_err(|e| map_request_error(None, e))?;
        Ok(())
    }

    async fn probe(&self) -> Result<String> {
        let me = self
            .with_retry(|| self.bot.get_me())
            .await
            .map_err(|e| map_request_error(None, e))?;
        Ok(me.user.username.clone().unwrap_or_default())
    }
}
