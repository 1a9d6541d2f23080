//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;

mod commands;

#[derive(Parser)]
#[command(name = "enrich")]
#[command(version)]
#[command(about = "Label datasets by pressing buttons in Telegram")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run the Telegram bot (long-polling)
    Bot,
    /// Inspect labeling sessions
    Sessions {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum SessionCommands {
    /// Lists configured and persisted sessions
    List,
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Parse and validate the config file
    Check,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bot => {
            enrich_bot::logging::init();
            let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;
            rt.block_on(enrich_bot::run())
        }
        Commands::Sessions { command } => match command {
            SessionCommands::List => commands::sessions::list(),
        },
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Check => commands::config::check(),
        },
    }
}
