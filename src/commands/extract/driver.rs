use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, error, info, warn};

use crate::catalog::{Catalog, FileStore};
use crate::error::ExtractError;
use crate::model::{BatchSummary, CatalogSeries, SeriesFailure};
use crate::sr::DocumentReader;
use crate::store::ReportSink;
use crate::template::{ReportRecord, normalize};
use crate::util::{file_safe_name, write_json_pretty};

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Also write every extracted record as `<series uid>.json` here.
    pub json_dir: Option<PathBuf>,
}

/// One incremental pass: every catalog series without a committed identity
/// row is extracted and upserted, one transaction per series.
///
/// Only an unreachable catalog or output store aborts the pass. Anything
/// that goes wrong inside a single series is logged, counted and skipped.
pub fn run_batch(
    catalog: &impl Catalog,
    file_store: &impl FileStore,
    reader: &impl DocumentReader,
    sink: &mut impl ReportSink,
    options: &ExtractOptions,
) -> Result<BatchSummary> {
    let series = catalog
        .list_series()
        .map_err(|err| ExtractError::StoreConnectivity(format!("catalog query failed: {err:#}")))?;
    let known = sink.known_series().map_err(|err| {
        ExtractError::StoreConnectivity(format!("recorded series query failed: {err:#}"))
    })?;

    let mut summary = BatchSummary {
        catalog_series: series.len(),
        ..BatchSummary::default()
    };

    let pending: Vec<&CatalogSeries> = series
        .iter()
        .filter(|entry| !known.contains(&entry.series_instance_uid))
        .collect();
    summary.already_recorded = series.len() - pending.len();

    info!(
        catalog = summary.catalog_series,
        recorded = summary.already_recorded,
        pending = pending.len(),
        "starting extraction pass"
    );

    for entry in pending {
        let uid = &entry.series_instance_uid;

        let record = match extract_series(entry, file_store, reader) {
            Ok(record) => record,
            Err(err) => {
                match err.downcast_ref::<ExtractError>() {
                    Some(ExtractError::MissingFile { missing, .. }) => {
                        warn!(
                            series = %uid,
                            missing = missing.len(),
                            first_missing = %missing
                                .first()
                                .map(|path| path.display().to_string())
                                .unwrap_or_default(),
                            "series files not available; will retry next run"
                        );
                        summary.skipped += 1;
                        summary.skipped_series.push(uid.clone());
                    }
                    Some(extract_err) => {
                        record_failure(&mut summary, entry, extract_err.kind(), &err);
                    }
                    None => record_failure(&mut summary, entry, "file_store", &err),
                }
                continue;
            }
        };

        if let Err(err) = sink.upsert(&record) {
            record_failure(&mut summary, entry, "store_write", &err);
            continue;
        }

        if let Some(dir) = &options.json_dir {
            // The database row is already committed; a failed export only warns.
            if let Err(err) = export_json(dir, &record) {
                warn!(series = %uid, error = %format!("{err:#}"), "failed to export record json");
            }
        }

        summary.processed += 1;
        summary.findings_written += record.findings.len();
        debug!(
            series = %uid,
            findings = record.findings.len(),
            categories = %record.categories.join(","),
            "series extracted"
        );
    }

    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        findings = summary.findings_written,
        "extraction pass finished"
    );
    Ok(summary)
}

fn extract_series(
    series: &CatalogSeries,
    file_store: &impl FileStore,
    reader: &impl DocumentReader,
) -> Result<ReportRecord> {
    let files = file_store.resolve(series)?;
    if !files.is_complete() {
        return Err(ExtractError::MissingFile {
            series_uid: series.series_instance_uid.clone(),
            missing: files.missing,
        }
        .into());
    }

    let report = reader.read(&files.present)?;
    let record = normalize(&report, series)?;
    Ok(record)
}

fn record_failure(
    summary: &mut BatchSummary,
    series: &CatalogSeries,
    kind: &str,
    err: &anyhow::Error,
) {
    let reason = format!("{err:#}");
    error!(series = %series.series_instance_uid, kind, reason = %reason, "series failed");
    summary.failed += 1;
    summary.failures.push(SeriesFailure {
        study_instance_uid: series.study_instance_uid.clone(),
        series_instance_uid: series.series_instance_uid.clone(),
        kind: kind.to_string(),
        reason,
    });
}

fn export_json(dir: &Path, record: &ReportRecord) -> Result<()> {
    let path = dir.join(format!(
        "{}.json",
        file_safe_name(&record.identity.series_instance_uid)
    ));
    write_json_pretty(&path, record)
}
