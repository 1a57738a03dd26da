use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;

use skybot_engine::{EngineConfig, RetryPolicy, SessionPolicy};

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_handle: String,
    pub bot_password: String,
    pub pds_url: String,
    pub db_path: PathBuf,

    pub openai_api_key: String,
    pub openai_url: String,
    pub model: String,

    pub poll_secs: u64,
    pub aggregate_secs: u64,
    pub plc_url: String,

    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();

        let persona = match std::env::var("SKYBOT_PERSONA_PATH") {
            Ok(path) => std::fs::read_to_string(&path)
                .with_context(|| format!("reading persona from {}", path))?
                .trim()
                .to_string(),
            Err(_) => defaults.persona.clone(),
        };

        let bot_names = std::env::var("SKYBOT_BOT_NAMES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        let engine = EngineConfig {
            bot_names,
            persona,
            fortune_cycle_hours: env_or("SKYBOT_FORTUNE_CYCLE_HOURS", "24")?,
            fortune_point_cost: env_or("SKYBOT_FORTUNE_POINT_COST", "1")?,
            friend_talk_cost: env_or("SKYBOT_FRIEND_TALK_COST", "1")?,
            draw_cost: env_or("SKYBOT_DRAW_COST", "5")?,
            base_percent: env_or("SKYBOT_BASE_PERCENT", "3")?,
            mention_bonus_percent: env_or("SKYBOT_MENTION_BONUS_PERCENT", "5")?,
            idle_bonus_percent: env_or("SKYBOT_IDLE_BONUS_PERCENT", "100")?,
            idle_window_minutes: env_or("SKYBOT_IDLE_WINDOW_MINUTES", "60")?,
            dialog_window: env_or("SKYBOT_DIALOG_WINDOW", "10")?,
            chunk_chars: env_or("SKYBOT_CHUNK_CHARS", "280")?,
            page_limit: env_or("SKYBOT_PAGE_LIMIT", "50")?,
            max_pages: env_or("SKYBOT_MAX_PAGES", "3")?,
            directory_endpoint: std::env::var("SKYBOT_DIRECTORY_ENDPOINT")
                .unwrap_or_else(|_| "https://bsky.social".into()),
            milestone_step: env_or("SKYBOT_MILESTONE_STEP", "100")?,
            retry: RetryPolicy {
                max_attempts: env_or("SKYBOT_RETRY_ATTEMPTS", "5")?,
                base_delay: Duration::from_millis(env_or("SKYBOT_RETRY_BASE_MS", "500")?),
                max_delay: Duration::from_millis(env_or("SKYBOT_RETRY_MAX_MS", "30000")?),
            },
            session: SessionPolicy {
                relogin_interval: TimeDelta::minutes(env_or("SKYBOT_RELOGIN_MINUTES", "90")?),
                min_login_gap: TimeDelta::seconds(env_or("SKYBOT_MIN_LOGIN_GAP_SECS", "60")?),
            },
            min_call_gap: Duration::from_millis(env_or("SKYBOT_MIN_CALL_GAP_MS", "250")?),
            ..defaults
        };

        Ok(Self {
            bot_handle: required("BOT_HANDLE")?,
            bot_password: required("BOT_PASSWORD")?,
            pds_url: std::env::var("SKYBOT_PDS_URL").unwrap_or_else(|_| "https://bsky.social".into()),
            db_path: std::env::var("SKYBOT_DB_PATH")
                .unwrap_or_else(|_| "skybot.db".into())
                .into(),
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_url: std::env::var("SKYBOT_OPENAI_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            model: std::env::var("SKYBOT_MODEL").unwrap_or_else(|_| "gpt-5-mini".into()),
            poll_secs: env_or("SKYBOT_POLL_SECS", "3")?,
            aggregate_secs: env_or("SKYBOT_AGGREGATE_SECS", "60")?,
            plc_url: std::env::var("SKYBOT_PLC_URL").unwrap_or_else(|_| "https://plc.directory".into()),
            engine,
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{} must be set", key))
}

fn env_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .unwrap_or_else(|_| default.into())
        .parse()
        .with_context(|| format!("invalid value for {}", key))
}
