//! vkbot binary: run the bot or print the token's identity.

use anyhow::Result;
use clap::Parser;
use vkbot::{load_config, run_bot, whoami, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run(_) => run_bot(config).await,
        Commands::Whoami(_) => whoami(config).await,
    }
}
