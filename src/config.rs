//! Configuration loader and validator for the broadcast bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    #[serde(default)]
    pub broadcast: Broadcast,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// User ids allowed to start and cancel broadcasts.
    pub admins: Vec<i64>,
}

/// Delivery tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Broadcast {
    pub concurrency: usize,
    pub max_redirects: u32,
    pub rate_window: usize,
    pub report_interval_ms: u64,
    pub report_steps: usize,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self {
            concurrency: 25,
            max_redirects: 3,
            rate_window: 100,
            report_interval_ms: 2000,
            report_steps: 20,
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL for the recipient store; `DATABASE_URL` wins when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/broadcast.db", self.app.data_dir))
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.telegram.admins.contains(&user_id)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    let b = &cfg.broadcast;
    if b.concurrency == 0 {
        return Err(ConfigError::Invalid("broadcast.concurrency must be > 0"));
    }
    if b.max_redirects == 0 {
        return Err(ConfigError::Invalid("broadcast.max_redirects must be > 0"));
    }
    if b.rate_window < 2 {
        return Err(ConfigError::Invalid("broadcast.rate_window must be >= 2"));
    }
    if b.report_interval_ms == 0 {
        return Err(ConfigError::Invalid("broadcast.report_interval_ms must be > 0"));
    }
    if b.report_steps == 0 {
        return Err(ConfigError::Invalid("broadcast.report_steps must be > 0"));
    }

    Ok(())
}

/// Example configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  admins:
    - 123456789

broadcast:
  concurrency: 25
  max_redirects: 3
  rate_window: 100
  report_interval_ms: 2000
  report_steps: 20
"#
}
