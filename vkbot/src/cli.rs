//! Command line of the `vkbot` binary.
//!
//! Both subcommands take the rest of their settings from the environment (see [`BotConfig`]).
//! `--token` only replaces `VK_TOKEN`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::BotConfig;

#[derive(Parser, Debug)]
#[command(name = "vkbot", version, about = "VK long-poll bot engine")]
pub struct Cli {
    /// Dotenv file to read instead of `./.env`.
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Default, Clone)]
pub struct TokenArg {
    /// Access token of a user or community account.
    #[arg(short, long, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Poll for messages and answer them until Ctrl-C.
    Run(TokenArg),
    /// Report whether the token belongs to a user or a community, with its id.
    Whoami(TokenArg),
}

impl Commands {
    pub fn token(&self) -> Option<String> {
        match self {
            Commands::Run(arg) | Commands::Whoami(arg) => arg.token.clone(),
        }
    }
}

/// Reads the dotenv file (an explicit `--env-file` must exist; `./.env` is optional), then
/// builds [`BotConfig`] with the command's token override.
pub fn load_config(cli: &Cli) -> Result<BotConfig> {
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("cannot read env file {}", path.display()))?;
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    BotConfig::load(cli.command.token())
}
