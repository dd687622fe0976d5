//! ChatRecall CLI: the main entry point.
//!
//! Commands:
//! - `init`     Write a default config file
//! - `chat`     Interactive chat or single-message mode
//! - `usage`    Token usage and cost report
//! - `pricing`  Model price table

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrecall",
    about = "ChatRecall: chat with long-term, embedding-based context recall",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file if none exists
    Init,

    /// Chat with the assistant
    Chat {
        /// Resume this session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show estimated token usage and costs
    Usage {
        /// Report on one session instead of all sessions
        #[arg(short, long)]
        session: Option<String>,
    },

    /// List model prices (USD per 1M tokens)
    Pricing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat { session, message } => commands::chat::run(session, message).await?,
        Commands::Usage { session } => commands::usage::usage(session).await?,
        Commands::Pricing => commands::usage::pricing().await?,
    }

    Ok(())
}
