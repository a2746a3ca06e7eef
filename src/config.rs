use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::ExtractError;
use crate::util::write_json_pretty;

pub const DEFAULT_CONFIG_PATH: &str = "airc_config.json";
pub const LOG_FILE_NAME: &str = "airc_extract.log";

fn default_log_level() -> String {
    "info".to_string()
}

fn default_file_log_level() -> String {
    "debug".to_string()
}

/// Settings written by `init` and read once at startup by every other
/// command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Conquest archive index (SQLite).
    pub dicom_db: PathBuf,
    /// Output database holding the extracted tables.
    pub data_db: PathBuf,
    /// Directory that `DICOMImages.ObjectFile` paths are relative to.
    /// See [`AppConfig::file_root`] for the default.
    #[serde(default)]
    pub file_root: Option<PathBuf>,
    /// SQL LIKE pattern on the series description.
    #[serde(default)]
    pub series_filter: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_file_log_level")]
    pub log_level_file: String,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!(
                "configuration file {} not found; run `airc-extract init` to create it",
                path.display()
            );
        }
        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_pretty(path, self)
    }

    /// Explicit `file_root`, else the Conquest MAG0 directory: the parent of
    /// `dbase/` when the index lives there, otherwise the index's directory.
    pub fn file_root(&self) -> PathBuf {
        if let Some(root) = &self.file_root {
            return root.clone();
        }
        let Some(dir) = self.dicom_db.parent().filter(|dir| !dir.as_os_str().is_empty()) else {
            return PathBuf::from(".");
        };
        let in_dbase = dir
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("dbase"));
        match dir.parent() {
            Some(mag0) if in_dbase && !mag0.as_os_str().is_empty() => mag0.to_path_buf(),
            _ => dir.to_path_buf(),
        }
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
    }

    /// Checks levels and that both databases exist. Missing databases are
    /// reported as connectivity failures.
    pub fn validate(&self) -> Result<()> {
        parse_level(&self.log_level).context("invalid log_level")?;
        parse_level(&self.log_level_file).context("invalid log_level_file")?;

        if !self.dicom_db.is_file() {
            return Err(ExtractError::StoreConnectivity(format!(
                "DICOM database {} not found",
                self.dicom_db.display()
            ))
            .into());
        }
        if !self.data_db.is_file() {
            return Err(ExtractError::StoreConnectivity(format!(
                "data database {} not found",
                self.data_db.display()
            ))
            .into());
        }
        Ok(())
    }
}

pub fn parse_level(raw: &str) -> Result<Level> {
    raw.trim()
        .parse::<Level>()
        .map_err(|_| anyhow::anyhow!("unknown log level {raw:?}; expected trace, debug, info, warn or error"))
}
