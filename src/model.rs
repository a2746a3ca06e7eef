use serde::{Deserialize, Serialize};

/// One SR series as listed by the archive catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSeries {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesFailure {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub kind: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub catalog_series: usize,
    pub already_recorded: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub findings_written: usize,
    pub skipped_series: Vec<String>,
    pub failures: Vec<SeriesFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractPaths {
    pub config_path: String,
    pub dicom_db: String,
    pub data_db: String,
    pub file_root: String,
    pub json_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub paths: ExtractPaths,
    pub summary: BatchSummary,
}
