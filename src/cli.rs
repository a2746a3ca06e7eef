use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "airc-extract",
    version,
    about = "Extract AI-Rad Companion chest CT structured report measurements into SQLite"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the configuration, create the data database and check the archive.
    Init(InitArgs),
    /// Extract every catalog SR series not yet in the data database.
    Run(RunArgs),
    Status(StatusArgs),
}

impl Commands {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Self::Init(args) => &args.config,
            Self::Run(args) => &args.config,
            Self::Status(args) => &args.config,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Conquest archive database.
    #[arg(long, short = 'd')]
    pub dicom_db: PathBuf,

    /// Output data database; created when absent.
    #[arg(long, short = 'o')]
    pub data_db: PathBuf,

    /// Directory that archive object paths are relative to. Defaults to the
    /// parent of a `dbase/` directory holding the database, otherwise the
    /// database's own directory.
    #[arg(long)]
    pub file_root: Option<PathBuf>,

    #[arg(long)]
    pub series_filter: Option<String>,

    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, short = 'l', default_value = "info")]
    pub log_level: String,

    #[arg(long, short = 'f', default_value = "debug")]
    pub log_level_file: String,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Also write each extracted report as JSON into this directory.
    #[arg(long, short = 'j')]
    pub json_dir: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
}
