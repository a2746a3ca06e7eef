use anyhow::Result;
use chrono::Utc;
use tracing::info;

use super::driver::{ExtractOptions, run_batch};
use crate::catalog::{ConquestCatalog, ConquestFileStore};
use crate::cli::RunArgs;
use crate::config::AppConfig;
use crate::model::{ExtractPaths, ExtractRunManifest};
use crate::sr::DicomFileReader;
use crate::store::{DB_SCHEMA_VERSION, ReportStore};
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

const MANIFEST_VERSION: u32 = 1;

pub fn run(args: RunArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let config = AppConfig::load(&args.config)?;
    config.validate()?;

    let file_root = config.file_root();
    let manifest_path = args.manifest_path.clone().or_else(|| {
        config.log_dir.as_ref().map(|dir| {
            dir.join(format!("extract_run_{}.json", utc_compact_string(started_ts)))
        })
    });

    info!(
        run_id = %run_id,
        dicom_db = %config.dicom_db.display(),
        data_db = %config.data_db.display(),
        "starting extraction"
    );

    let catalog = ConquestCatalog::open(&config.dicom_db, config.series_filter.clone())?;
    let file_store = ConquestFileStore::open(&config.dicom_db, file_root.clone())?;
    let mut store = ReportStore::open(&config.data_db)?;
    store.ensure_schema()?;

    let options = ExtractOptions {
        json_dir: args.json_dir.clone(),
    };
    let summary = run_batch(&catalog, &file_store, &DicomFileReader, &mut store, &options)?;

    if let Some(path) = manifest_path {
        let manifest = ExtractRunManifest {
            manifest_version: MANIFEST_VERSION,
            run_id: run_id.clone(),
            db_schema_version: DB_SCHEMA_VERSION.to_string(),
            status: if summary.failed == 0 {
                "completed".to_string()
            } else {
                "completed_with_failures".to_string()
            },
            started_at,
            updated_at: now_utc_string(),
            command: render_run_command(&args),
            paths: ExtractPaths {
                config_path: args.config.display().to_string(),
                dicom_db: config.dicom_db.display().to_string(),
                data_db: config.data_db.display().to_string(),
                file_root: file_root.display().to_string(),
                json_dir: args
                    .json_dir
                    .as_ref()
                    .map(|path| path.display().to_string()),
            },
            summary,
        };
        write_json_pretty(&path, &manifest)?;
        info!(run_id = %run_id, manifest = %path.display(), "wrote run manifest");
    }

    Ok(())
}

fn render_run_command(args: &RunArgs) -> String {
    let mut command = vec![
        "airc-extract".to_string(),
        "run".to_string(),
        "--config".to_string(),
        args.config.display().to_string(),
    ];

    if let Some(path) = &args.json_dir {
        command.push("--json-dir".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.manifest_path {
        command.push("--manifest-path".to_string());
        command.push(path.display().to_string());
    }

    command.join(" ")
}
