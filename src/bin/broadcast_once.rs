use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{info, warn};

use tg_broadcast::broadcast::{BroadcastSettings, Broadcaster};
use tg_broadcast::config;
use tg_broadcast::db::{self, SqliteRecipientSource};
use tg_broadcast::format;
use tg_broadcast::gateway::{LogSink, StatusSink};
use tg_broadcast::model::Payload;
use tg_broadcast::telegram::{TelegramGateway, TelegramStatus};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Send one message to every registered recipient and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// File holding the message body in Bot-API HTML
    #[arg(long)]
    text_file: PathBuf,

    /// Telegram file id of an image to send with the text as caption
    #[arg(long)]
    image: Option<String>,

    /// Chat that receives the live status message (defaults to the log)
    #[arg(long)]
    status_chat: Option<i64>,

    /// Override broadcast.concurrency from the config
    #[arg(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let body = tokio::fs::read_to_string(&args.text_file)
        .await
        .with_context(|| format!("failed to read {}", args.text_file.display()))?;
    let (text, buttons) = format::extract_buttons(body.trim())?;
    let mut payload = Payload::text(text).with_buttons(buttons);
    if let Some(image) = args.image {
        payload = payload.with_image(image);
    }

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let settings = BroadcastSettings::from(&cfg.broadcast);
    let concurrency = args.concurrency.unwrap_or(settings.concurrency).max(1);
    let broadcaster = Broadcaster::new(Arc::new(TelegramGateway::new(bot.clone())), settings);
    let sink: Arc<dyn StatusSink> = match args.status_chat {
        Some(chat) => Arc::new(TelegramStatus::new(bot, ChatId(chat))),
        None => Arc::new(LogSink),
    };

    let run = broadcaster.new_run().await;
    let on_interrupt = run.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling broadcast");
            on_interrupt.cancel();
        }
    });

    info!(run_id = %run.id(), concurrency, "starting one-shot broadcast");
    let source = SqliteRecipientSource::new(pool);
    let summary = broadcaster
        .start_broadcast(&run, &source, payload, concurrency, sink)
        .await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
