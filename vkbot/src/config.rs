//! Bot configuration loaded from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use vkbot_api::{ApiConfig, DEFAULT_API_URL, DEFAULT_API_VERSION};
use vkbot_core::AccountMode;
use vkbot_longpoll::{SessionSettings, DEFAULT_VERSION, DEFAULT_WAIT};

use crate::bot::{BotSettings, DEFAULT_POLL_INTERVAL, DEFAULT_RECONCILE_INTERVAL};

/// Env-based config. `load()` then `validate()` before building the client.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// VK_TOKEN
    pub token: String,
    /// VK_API_URL
    pub api_url: String,
    /// VK_API_VERSION
    pub api_version: String,
    /// VK_LANG
    pub lang: Option<String>,
    /// VK_GROUP_ID: when set, account detection is skipped and the bot runs in group mode
    pub group_id: Option<i64>,
    /// VK_ADMIN_ID: user id that receives error notifications
    pub admin_id: Option<i64>,
    /// VK_REQUEST_INTERVAL_MS: delay after every remote call
    pub request_interval_ms: u64,
    /// LONGPOLL_WAIT
    pub longpoll_wait: u32,
    /// LONGPOLL_VERSION
    pub longpoll_version: u32,
    /// POLL_INTERVAL_SECS
    pub poll_interval_secs: u64,
    /// RECONCILE_INTERVAL_SECS
    pub reconcile_interval_secs: u64,
    /// DEDUP_WINDOW_SECS
    pub dedup_window_secs: u64,
    /// AUTO_ACCEPT_FRIENDS
    pub auto_accept_friends: bool,
    /// LOG_FILE
    pub log_file: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_id(key: &str) -> Result<Option<i64>> {
    env::var(key)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<i64>()
                .with_context(|| format!("{} is not a number: {}", key, s))
        })
        .transpose()
}

fn env_flag(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

impl BotConfig {
    /// Load from environment variables. `token` overrides VK_TOKEN if provided.
    pub fn load(token: Option<String>) -> Result<Self> {
        let token = match token {
            Some(t) => t,
            None => env::var("VK_TOKEN").context("VK_TOKEN not set")?,
        };
        let api_url = env::var("VK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_version =
            env::var("VK_API_VERSION").unwrap_or_else(|_| DEFAULT_API_VERSION.to_string());
        let lang = env::var("VK_LANG").ok().filter(|s| !s.trim().is_empty());
        let group_id = env_id("VK_GROUP_ID")?;
        let admin_id = env_id("VK_ADMIN_ID")?;

        Ok(Self {
            token,
            api_url,
            api_version,
            lang,
            group_id,
            admin_id,
            request_interval_ms: env_parse("VK_REQUEST_INTERVAL_MS", 400),
            longpoll_wait: env_parse("LONGPOLL_WAIT", DEFAULT_WAIT),
            longpoll_version: env_parse("LONGPOLL_VERSION", DEFAULT_VERSION),
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL.as_secs()),
            reconcile_interval_secs: env_parse(
                "RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL.as_secs(),
            ),
            dedup_window_secs: env_parse("DEDUP_WINDOW_SECS", 60),
            auto_accept_friends: env_flag("AUTO_ACCEPT_FRIENDS"),
            log_file: env::var("LOG_FILE").unwrap_or_else(|_| "logs/vkbot.log".to_string()),
        })
    }

    /// Validate config. Call after load() to fail fast before init.
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            anyhow::bail!("VK_TOKEN is empty");
        }
        if reqwest::Url::parse(&self.api_url).is_err() {
            anyhow::bail!("VK_API_URL is not a valid URL: {}", self.api_url);
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS must be greater than 0");
        }
        if self.reconcile_interval_secs == 0 {
            anyhow::bail!("RECONCILE_INTERVAL_SECS must be greater than 0");
        }
        if self.dedup_window_secs == 0 {
            anyhow::bail!("DEDUP_WINDOW_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::new(self.token.clone())
            .with_api_url(self.api_url.clone())
            .with_version(self.api_version.clone())
            .with_lang(self.lang.clone())
            .with_group_id(self.group_id)
            .with_request_interval(self.request_interval())
    }

    pub fn session_settings(&self, account_mode: AccountMode) -> SessionSettings {
        SessionSettings::new(account_mode)
            .with_wait(self.longpoll_wait)
            .with_version(self.longpoll_version)
            .with_request_interval(self.request_interval())
    }

    pub fn bot_settings(&self) -> BotSettings {
        BotSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
            dedup_window: Duration::from_secs(self.dedup_window_secs),
            auto_accept_relationships: self.auto_accept_friends,
            admin_id: self.admin_id,
            ..BotSettings::default()
        }
    }
}
