mod catalog;
mod cli;
mod commands;
mod config;
mod error;
mod model;
mod sr;
mod store;
mod template;
mod util;

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, LOG_FILE_NAME};
use crate::util::ensure_directory;

fn main() {
    let cli = Cli::parse();
    init_tracing(&LogSettings::for_command(&cli.command));

    if let Err(err) = run(cli) {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Run(args) => commands::extract::run(args),
        Commands::Status(args) => commands::status::run(args),
    }
}

struct LogSettings {
    level: String,
    file_level: String,
    log_file: Option<PathBuf>,
}

impl LogSettings {
    /// `init` takes its levels from the command line; every other command
    /// reads them from the configuration file when it can be loaded.
    fn for_command(command: &Commands) -> Self {
        match command {
            Commands::Init(args) => Self {
                level: args.log_level.clone(),
                file_level: args.log_level_file.clone(),
                log_file: args.log_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME)),
            },
            other => match AppConfig::load(other.config_path()) {
                Ok(config) => Self {
                    log_file: config.log_file(),
                    level: config.log_level,
                    file_level: config.log_level_file,
                },
                Err(_) => Self {
                    level: "info".to_string(),
                    file_level: "debug".to_string(),
                    log_file: None,
                },
            },
        }
    }
}

fn init_tracing(settings: &LogSettings) {
    // RUST_LOG wins over the configured console level.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.trim()));

    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let mut file_error = None;
    let file_layer = match settings.log_file.as_deref().map(open_log_file) {
        Some(Ok(file)) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new(settings.file_level.trim())),
        ),
        Some(Err(err)) => {
            file_error = Some(err);
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    if let Some(err) = file_error {
        warn!(error = %format!("{err:#}"), "file logging disabled");
    }
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        ensure_directory(dir)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
