//! # vkbot
//!
//! Application crate: the scheduler ([`VkBot`], [`BotBuilder`]) that drives the long-poll
//! session and the router, env-based [`BotConfig`], demo handlers and the CLI.

pub mod bot;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod runner;

pub use bot::{
    AdminNotifier, BotBuilder, BotSettings, CycleSummary, Reconciler, VkBot,
    DEFAULT_DELIVERY_FAILURE_TEXT, DEFAULT_POLL_INTERVAL, DEFAULT_RECONCILE_INTERVAL,
};
pub use cli::{load_config, Cli, Commands, TokenArg};
pub use config::BotConfig;
pub use runner::{build_bot, detect_identity, run_bot, whoami};
