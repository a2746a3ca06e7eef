use anyhow::{Result, bail};
use tracing::info;

use crate::catalog::ConquestCatalog;
use crate::cli::InitArgs;
use crate::config::AppConfig;
use crate::error::ExtractError;
use crate::store::ReportStore;
use crate::util::ensure_directory;

pub fn run(args: InitArgs) -> Result<()> {
    let config = AppConfig {
        dicom_db: args.dicom_db,
        data_db: args.data_db,
        file_root: args.file_root,
        series_filter: args.series_filter,
        log_dir: args.log_dir,
        log_level: args.log_level,
        log_level_file: args.log_level_file,
    };

    if !config.dicom_db.is_file() {
        return Err(ExtractError::StoreConnectivity(format!(
            "DICOM database {} not found",
            config.dicom_db.display()
        ))
        .into());
    }
    ConquestCatalog::open(&config.dicom_db, config.series_filter.clone())?;
    info!(path = %config.dicom_db.display(), "DICOM database is readable");

    let file_root = config.file_root();
    if !file_root.is_dir() {
        bail!("file root {} is not a directory", file_root.display());
    }
    info!(path = %file_root.display(), "resolving archive object files against file root");

    if let Some(dir) = &config.log_dir {
        ensure_directory(dir)?;
    }

    if let Some(parent) = config.data_db.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    let existed = config.data_db.exists();
    let store = ReportStore::create(&config.data_db)?;
    store.ensure_schema()?;
    if existed {
        info!(path = %config.data_db.display(), "data database already exists; schema checked");
    } else {
        info!(path = %config.data_db.display(), "created data database");
    }

    config.validate()?;
    config.save(&args.config)?;
    info!(path = %args.config.display(), "wrote configuration");

    Ok(())
}
