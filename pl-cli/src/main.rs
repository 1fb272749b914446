//! Parley CLI - Command-line access to the local message store.
//!
//! Inspects conversations, runs asset collection scans, and drives owed
//! destruction timers against the same database the client uses.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use pl_core::config::{AppConfig, ConfigHandle};
use pl_core::error::PlResult;
use pl_core::logging;
use pl_core::platform::Platform;

/// Parley - local persistence tooling for the Parley messaging client.
#[derive(Parser)]
#[command(
    name = "parley",
    version,
    about = "Parley message store CLI",
    long_about = "A command-line interface to the Parley message store.\n\
                   Browse conversations, collect assets by category and run ephemeral message timers."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List and create conversations.
    Conversations {
        #[command(subcommand)]
        action: commands::conversations::ConversationsAction,
    },
    /// List and append messages.
    Messages {
        #[command(subcommand)]
        action: commands::messages::MessagesAction,
    },
    /// Collect a conversation's messages by content category.
    Assets {
        /// Conversation id.
        conversation: i64,
        /// Categories a match must have, e.g. `image` or `text,link`. Repeat for several filters.
        #[arg(short, long = "include", default_value = "image")]
        include: Vec<String>,
        /// Categories no match may have, applied to every filter.
        #[arg(short, long)]
        exclude: Option<String>,
        /// Messages scanned per page (overrides config).
        #[arg(short = 'p', long)]
        page_size: Option<usize>,
        /// Scan in one pass on this thread instead of paging on the contexts.
        #[arg(long)]
        unbatched: bool,
    },
    /// Inspect and run ephemeral message timers.
    Timers {
        #[command(subcommand)]
        action: commands::timers::TimersAction,
    },
    /// Database management commands.
    Db {
        #[command(subcommand)]
        action: commands::db::DbAction,
    },
}

#[tokio::main]
async fn main() -> PlResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from_file(std::path::Path::new(path))?,
        None => AppConfig::load_default()?,
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("logs"));
    let _guard = logging::init_from_config(&config.logging, &log_dir)?;

    let config_handle = ConfigHandle::new(config);

    info!(
        "Parley CLI v{} on {}",
        pl_core::constants::APP_VERSION,
        Platform::current()
    );

    // Dispatch to command handlers
    match cli.command {
        Commands::Conversations { action } => {
            commands::conversations::run(config_handle, action, cli.format).await
        }
        Commands::Messages { action } => {
            commands::messages::run(config_handle, action, cli.format).await
        }
        Commands::Assets { conversation, include, exclude, page_size, unbatched } => {
            commands::assets::run(config_handle, conversation, include, exclude, page_size, unbatched, cli.format)
                .await
        }
        Commands::Timers { action } => {
            commands::timers::run(config_handle, action, cli.format).await
        }
        Commands::Db { action } => {
            commands::db::run(config_handle, action, cli.format).await
        }
    }
}
