use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tg_broadcast::broadcast::{BroadcastSettings, Broadcaster};
use tg_broadcast::handlers::{self, BotState};
use tg_broadcast::telegram::TelegramGateway;
use tg_broadcast::{config, db};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let broadcaster = Arc::new(Broadcaster::new(
        Arc::new(TelegramGateway::new(bot.clone())),
        BroadcastSettings::from(&cfg.broadcast),
    ));
    let state = Arc::new(BotState::new(cfg, pool, broadcaster));

    info!("starting telegram bot");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let state = state.clone();
        async move {
            if let Err(err) = handlers::handle_update(&bot, &state, &msg).await {
                error!(?err, "failed to handle update");
            }
            respond(())
        }
    })
    .await;

    Ok(())
}
