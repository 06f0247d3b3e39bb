use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::db::{self, Pool, SqliteRecipientSource};
use crate::format::{self, FormatError, Span};
use crate::model::Payload;
use crate::telegram::{spans_from_entities, TelegramStatus};
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use teloxide::prelude::*;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// Shared state of the running bot.
pub struct BotState {
    pub cfg: Config,
    pub pool: Pool,
    pub broadcaster: Arc<Broadcaster>,
    /// Admins whose next message becomes a broadcast payload.
    composing: Mutex<HashSet<i64>>,
}

impl BotState {
    pub fn new(cfg: Config, pool: Pool, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            cfg,
            pool,
            broadcaster,
            composing: Mutex::new(HashSet::new()),
        }
    }

    async fn take_composing(&self, user_id: i64) -> bool {
        self.composing.lock().await.remove(&user_id)
    }
}

#[instrument(skip_all)]
pub async fn handle_update(bot: &Bot, state: &BotState, msg: &Message) -> Result<()> {
    let user = match msg.from() {
        Some(u) => u,
        None => return Ok(()),
    };
    let user_id = user.id.0 as i64;
    let is_admin = state.cfg.is_admin(user_id);
    let trimmed = msg.text().map(str::trim).unwrap_or_default();

    if is_admin && state.take_composing(user_id).await {
        if trimmed == "/cancel" {
            let _ = bot
                .send_message(msg.chat.id, "Broadcast discarded.")
                .await;
            return Ok(());
        }
        if is_command(trimmed) {
            state.composing.lock().await.insert(user_id);
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "Still waiting for the broadcast message. /cancel to abort.",
                )
                .await;
            return Ok(());
        }
        return start_broadcast_from(bot, state, msg).await;
    }

    match trimmed {
        "/start" => {
            let full_name = format!(
                "{} {}",
                user.first_name,
                user.last_name.clone().unwrap_or_default()
            );
            db::upsert_user(
                &state.pool,
                user_id,
                user.username.as_deref(),
                Some(full_name.trim()),
            )
            .await?;
            info!(user_id, "registered recipient");
            let _ = bot
                .send_message(msg.chat.id, "You are subscribed to announcements.")
                .await;
        }
        "/ping" => {
            let _ = bot.send_message(msg.chat.id, "PONG").await;
        }
        "/broadcast" if is_admin => {
            state.composing.lock().await.insert(user_id);
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "Send the message to broadcast (text, or a photo with caption).\n\
                     Add URL buttons with {Label}:https://link. /cancel to abort.",
                )
                .await;
        }
        "/cancel" if is_admin => {
            let n = state.broadcaster.cancel_all().await;
            let reply = if n == 0 {
                "No broadcast is running.".to_string()
            } else {
                format!("Cancelling {} broadcast(s).", n)
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
        }
        "/stats" if is_admin => {
            let users = db::count_users(&state.pool).await?;
            let active = state.broadcaster.active_runs().await.len();
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!("Recipients: {}\nActive broadcasts: {}", users, active),
                )
                .await;
        }
        _ => {}
    }
    Ok(())
}

/// Bot commands are never taken as broadcast content.
fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Builds a payload from the operator's message text (already stripped of
/// formatting) and its formatting spans.
pub fn compose_payload(
    raw: &str,
    spans: &[Span],
    image: Option<String>,
) -> Result<Payload, FormatError> {
    let (text, spans, buttons) = format::strip_buttons(raw, spans)?;
    Ok(Payload {
        text: format::render_html(&text, &spans),
        image,
        buttons,
    })
}

async fn start_broadcast_from(bot: &Bot, state: &BotState, msg: &Message) -> Result<()> {
    let (raw, entities) = match (msg.text(), msg.caption()) {
        (Some(text), _) => (text, msg.entities()),
        (None, Some(caption)) => (caption, msg.caption_entities()),
        (None, None) => ("", None),
    };
    let image = msg
        .photo()
        .and_then(|sizes| sizes.last())
        .map(|size| size.file.id.clone());
    if raw.trim().is_empty() && image.is_none() {
        let _ = bot
            .send_message(msg.chat.id, "Nothing to broadcast: send text or a photo.")
            .await;
        return Ok(());
    }

    let spans = spans_from_entities(entities.unwrap_or(&[]));
    let payload = match compose_payload(raw, &spans, image) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%err, "rejected broadcast payload");
            let _ = bot
                .send_message(msg.chat.id, format!("Cannot broadcast this message: {}", err))
                .await;
            return Ok(());
        }
    };

    let broadcaster = state.broadcaster.clone();
    let source = SqliteRecipientSource::new(state.pool.clone());
    let sink = Arc::new(TelegramStatus::new(bot.clone(), msg.chat.id));
    let concurrency = broadcaster.settings().concurrency;
    let run = broadcaster.new_run().await;
    info!(run_id = %run.id(), "broadcast requested");

    tokio::spawn(async move {
        let summary = broadcaster
            .start_broadcast(&run, &source, payload, concurrency, sink)
            .await;
        info!(run_id = %summary.run_id, outcome = ?summary.outcome, "broadcast run ended");
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SpanKind;
    use crate::model::ButtonAction;

    #[test]
    fn payload_from_formatted_text_with_buttons() {
        let raw = "Big news\n{Read}:https://example.com/post";
        let spans = [Span::new(SpanKind::Bold, 0, 3)];
        let payload = compose_payload(raw, &spans, Some("file-1".into())).unwrap();
        assert_eq!(payload.text, "<b>Big</b> news");
        assert_eq!(payload.image.as_deref(), Some("file-1"));
        assert_eq!(payload.buttons.len(), 1);
        assert_eq!(payload.buttons[0][0].text, "Read");
    }

    #[test]
    fn button_inside_formatting_keeps_markup_balanced() {
        let raw = "Big news {Read}:https://example.com/post";
        let spans = [Span::new(SpanKind::Bold, 0, raw.encode_utf16().count())];
        let payload = compose_payload(raw, &spans, None).unwrap();
        assert_eq!(payload.text, "<b>Big news</b>");
        let (plain, parsed) = format::parse_html(&payload.text).unwrap();
        assert_eq!(plain, "Big news");
        assert_eq!(parsed, vec![Span::new(SpanKind::Bold, 0, 8)]);
        match &payload.buttons[0][0].action {
            ButtonAction::Url(url) => assert_eq!(url.as_str(), "https://example.com/post"),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn commands_are_not_broadcast_content() {
        assert!(is_command("/stats"));
        assert!(is_command("/broadcast"));
        assert!(!is_command("Sale starts today"));
        assert!(!is_command(""));
    }

    #[test]
    fn bad_button_url_rejects_payload() {
        let err = compose_payload("{x}:nope", &[], None).unwrap_err();
        assert!(matches!(err, FormatError::InvalidUrl { .. }));
    }
}
