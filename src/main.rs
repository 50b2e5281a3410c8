mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tidings::config::Config;

#[derive(Parser)]
#[command(
    name = "tidings",
    version,
    about = "Keyword crawl scheduling and quota-limited notification dispatch",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format, overrides the configuration file
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database, crawler state and heartbeat rows
    Init {
        /// Crawl frequency in hours for a new crawler state
        #[arg(long)]
        frequency: Option<i64>,
    },

    /// Load work definitions and recipients from a TOML file
    Load {
        /// File with [[definitions]] and [[recipients]] tables
        file: PathBuf,

        /// Rebuild the work pool afterwards
        #[arg(long, default_value = "false")]
        sync: bool,
    },

    /// Remove a work definition
    Remove {
        /// Definition name
        name: String,
    },

    /// Run the crawl scheduler, the dispatcher and their heartbeats
    Run {
        /// Leave the watchdogs to a separate `watch` process
        #[arg(long, default_value = "false")]
        no_watchdogs: bool,
    },

    /// Run only the crawl scheduler
    Crawl {
        /// Poll once and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Run only the dispatcher
    Dispatch {
        /// Run one dispatch cycle and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Run both watchdogs
    Watch,

    /// Rebuild the work pool from the definitions
    Sync,

    /// Turn the crawler on or off, or change its frequency
    Schedule {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,

        /// Hours between crawl cycles
        #[arg(long)]
        frequency: Option<i64>,
    },

    /// Show crawler state, heartbeat ages and queue sizes
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let format = cli.log_format.unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    setup_tracing(format, cli.verbose, &config.logging.level)?;

    tracing::debug!(database = %config.database.sqlite_path.display(), "Configuration loaded");

    match cli.command {
        Commands::Init { frequency } => commands::init(config, frequency)?,
        Commands::Load { file, sync } => commands::load(config, &file, sync)?,
        Commands::Remove { name } => commands::remove(config, &name)?,
        Commands::Run { no_watchdogs } => commands::run(config, !no_watchdogs).await?,
        Commands::Crawl { once } => commands::crawl(config, once).await?,
        Commands::Dispatch { once } => commands::dispatch(config, once).await?,
        Commands::Watch => commands::watch(config).await?,
        Commands::Sync => commands::sync(config)?,
        Commands::Schedule {
            enable,
            disable,
            frequency,
        } => {
            let switch = match (enable, disable) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            commands::schedule(config, switch, frequency)?
        }
        Commands::Status => commands::status(config)?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: LogFormat, verbose: bool, level: &str) -> Result<()> {
    let env_filter = if verbose {
        EnvFilter::new("tidings=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(format!("tidings={level},warn")))
            .context("Invalid log level")?
    };

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
