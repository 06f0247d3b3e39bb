use crate::format::{Span, SpanKind};
use crate::gateway::{Gateway, GatewayError, SinkError, StatusHandle, StatusSink};
use crate::model::{ButtonAction, Payload, Recipient};
use async_trait::async_trait;
use teloxide::payloads::{EditMessageTextSetters, SendMessageSetters, SendPhotoSetters};
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageEntity, MessageEntityKind,
    MessageId, ParseMode,
};
use teloxide::{ApiError, RequestError};

/// Bot API delivery without any client-side throttling, so that rate limit
/// signals reach the dispatcher untouched.
#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn keyboard(payload: &Payload) -> Option<InlineKeyboardMarkup> {
    if !payload.has_buttons() {
        return None;
    }
    let rows = payload.buttons.iter().map(|row| {
        row.iter()
            .map(|b| match &b.action {
                ButtonAction::Url(url) => InlineKeyboardButton::url(b.text.clone(), url.clone()),
                ButtonAction::Callback(data) => {
                    InlineKeyboardButton::callback(b.text.clone(), data.clone())
                }
            })
            .collect::<Vec<_>>()
    });
    Some(InlineKeyboardMarkup::new(rows))
}

pub fn classify_error(err: RequestError) -> GatewayError {
    match err {
        RequestError::RetryAfter(wait) => GatewayError::RetryAfter(wait),
        RequestError::MigrateToChatId(id) => GatewayError::Migrated(Recipient(id)),
        RequestError::Api(api) => classify_api_error(api),
        other => GatewayError::Other(other.to_string()),
    }
}

fn classify_api_error(err: ApiError) -> GatewayError {
    match err {
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::UserDeactivated
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots => GatewayError::Forbidden(err.to_string()),
        ApiError::ChatNotFound | ApiError::UserNotFound => GatewayError::NotFound(err.to_string()),
        ApiError::Unknown(msg) if msg.starts_with("Forbidden") => GatewayError::Forbidden(msg),
        ApiError::Unknown(msg) if msg.contains("not found") => GatewayError::NotFound(msg),
        other => GatewayError::Other(other.to_string()),
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    async fn send_text(&self, to: Recipient, payload: &Payload) -> Result<(), GatewayError> {
        let mut req = self
            .bot
            .send_message(ChatId(to.0), payload.text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard(payload) {
            req = req.reply_markup(markup);
        }
        req.await.map(|_| ()).map_err(classify_error)
    }

    async fn send_image(
        &self,
        to: Recipient,
        image: &str,
        payload: &Payload,
    ) -> Result<(), GatewayError> {
        let mut req = self
            .bot
            .send_photo(ChatId(to.0), InputFile::file_id(image))
            .caption(payload.text.clone())
            .parse_mode(ParseMode::Html);
        if let Some(markup) = keyboard(payload) {
            req = req.reply_markup(markup);
        }
        req.await.map(|_| ()).map_err(classify_error)
    }
}

/// Status message living in one chat, typically the operator's.
#[derive(Clone)]
pub struct TelegramStatus {
    bot: Bot,
    chat: ChatId,
}

impl TelegramStatus {
    pub fn new(bot: Bot, chat: ChatId) -> Self {
        Self { bot, chat }
    }
}

#[async_trait]
impl StatusSink for TelegramStatus {
    async fn create_status(&self, text: &str) -> Result<StatusHandle, SinkError> {
        let msg = self
            .bot
            .send_message(self.chat, text)
            .parse_mode(ParseMode::Html)
            .await
            .map_err(|e| SinkError(e.to_string()))?;
        Ok(StatusHandle {
            chat: msg.chat.id.0,
            message: msg.id.0,
        })
    }

    async fn update_status(&self, handle: &StatusHandle, text: &str) -> Result<(), SinkError> {
        match self
            .bot
            .edit_message_text(ChatId(handle.chat), MessageId(handle.message), text)
            .parse_mode(ParseMode::Html)
            .await
        {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(err) => Err(SinkError(err.to_string())),
        }
    }
}

/// Formatting entities of an incoming message as renderable spans.
pub fn spans_from_entities(entities: &[MessageEntity]) -> Vec<Span> {
    entities
        .iter()
        .filter_map(|e| {
            let kind = match &e.kind {
                MessageEntityKind::Bold => SpanKind::Bold,
                MessageEntityKind::Italic => SpanKind::Italic,
                MessageEntityKind::Underline => SpanKind::Underline,
                MessageEntityKind::Strikethrough => SpanKind::Strikethrough,
                MessageEntityKind::Spoiler => SpanKind::Spoiler,
                MessageEntityKind::Code => SpanKind::Code,
                MessageEntityKind::Pre { .. } => SpanKind::Pre,
                _ => return None,
            };
            Some(Span::new(kind, e.offset, e.length))
        })
        .collect()
}
