mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use zenith::config::ZenithConfig;

#[derive(Parser)]
#[command(name = "zenith", version, about = "Cognitive orchestration pipeline for grounded, audited answers")]
struct Cli {
    /// Config file (defaults to ~/.zenith/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one turn through the pipeline and print the answer
    Ask {
        /// User the turn belongs to
        #[arg(long)]
        user: String,
        /// Session to continue (a new one is created when omitted)
        #[arg(long)]
        session: Option<String>,
        /// File whose contents replace the routed persona
        #[arg(long)]
        persona: Option<PathBuf>,
        /// Print the route decision and verdict summary as JSON
        #[arg(long)]
        json: bool,
        /// The user's message
        text: String,
    },
    /// Print the stored profile facts for a user
    Profile {
        #[arg(long)]
        user: String,
    },
    /// Run database diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ZenithConfig::load_from(path)?,
        None => ZenithConfig::load()?,
    };

    // Log to stderr so stdout carries only answers.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Ask {
            user,
            session,
            persona,
            json,
            text,
        } => {
            cli::ask::ask(
                &config,
                cli::ask::AskArgs {
                    user,
                    session,
                    persona,
                    json,
                    text,
                },
            )
            .await?;
        }
        Command::Profile { user } => {
            cli::profile::profile(&config, &user).await?;
        }
        Command::Doctor => {
            cli::doctor::doctor(&config)?;
        }
    }

    Ok(())
}
