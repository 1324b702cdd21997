//! mcookbook - main entry point
//!
//! This binary provides three subcommands:
//! - live: Run the pair list service against a live exchange
//! - pairs: Resolve and print the configured pair lists once
//! - init: Write a starter configuration file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use mcookbook::config::{Config, LoggingConfig};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "mcookbook")]
#[command(about = "Crypto exchange pair list service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; may be given multiple times, later files
    /// override earlier ones
    #[arg(short, long, global = true, action = ArgAction::Append, value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Console log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also log to this file
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log file level
    #[arg(long, global = true)]
    log_file_level: Option<String>,

    /// Verbose output (debug level console logging)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pair list service against a live exchange
    Live {
        /// Pair list refresh interval in seconds
        #[arg(long, default_value = "300")]
        interval: u64,
    },

    /// Resolve and print the configured pair lists once
    Pairs,

    /// Write a starter configuration file
    Init {
        /// Directory the configuration file is written to
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    /// Logging settings: configuration file values with CLI flags on top.
    fn logging_config(&self, mut logging: LoggingConfig) -> LoggingConfig {
        if self.verbose {
            logging.cli.level = "debug".to_string();
        } else if let Some(level) = &self.log_level {
            logging.cli.level = level.clone();
        }
        if let Some(path) = &self.log_file {
            logging.file.path = Some(path.clone());
        }
        if let Some(level) = &self.log_file_level {
            logging.file.level = level.clone();
        }
        logging
    }
}

fn setup_logging(logging: &LoggingConfig) -> Result<()> {
    // Filter out noisy external crates
    let filter_for = |level: &str| {
        format!("{level},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn")
    };

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_for(&logging.cli.level)));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(true)
        .with_filter(console_filter);

    match &logging.file.path {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let file_appender =
                tracing_appender::rolling::never(dir.unwrap_or(Path::new(".")), file_name);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::new(filter_for(&logging.file.level)));

            tracing_subscriber::registry()
                .with(console_layer)
                .with(file_layer)
                .init();
            info!("Logging to file {}", path.display());
        }
        None => {
            tracing_subscriber::registry().with(console_layer).init();
        }
    }
    Ok(())
}

/// Load configuration before initializing logging, so the config file's
/// logging section can shape the log setup.
fn load_config(cli: &Cli) -> Result<(Config, Vec<PathBuf>)> {
    let files = commands::resolve_config_files(&cli.config, Path::new("."))?;
    let config = Config::from_files(&files)?;
    Ok((config, files))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init { dir, force } => {
            setup_logging(&cli.logging_config(LoggingConfig::default()))?;
            commands::init::run(dir.clone(), *force)
        }
        Commands::Live { interval } => {
            let (config, files) = load_config(&cli)?;
            setup_logging(&cli.logging_config(config.logging.clone()))?;
            announce_config(&files);
            commands::live::run(config, *interval).await
        }
        Commands::Pairs => {
            let (config, files) = load_config(&cli)?;
            setup_logging(&cli.logging_config(config.logging.clone()))?;
            announce_config(&files);
            commands::pairs::run(config).await
        }
    }
}

fn announce_config(files: &[PathBuf]) {
    info!(
        "Loaded configuration from: {}",
        files
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
}
