//! Read-only access to the Conquest archive: which SR series exist and where
//! their object files live.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, params};
use tracing::debug;

use crate::error::ExtractError;
use crate::model::CatalogSeries;

pub trait Catalog {
    /// SR series in a stable order.
    fn list_series(&self) -> Result<Vec<CatalogSeries>>;
}

/// Files of one series split by whether they exist on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesFiles {
    pub present: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

impl SeriesFiles {
    pub fn is_complete(&self) -> bool {
        !self.present.is_empty() && self.missing.is_empty()
    }
}

pub trait FileStore {
    fn resolve(&self, series: &CatalogSeries) -> Result<SeriesFiles>;
}

fn open_read_only(path: &Path) -> Result<Connection> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| {
        ExtractError::StoreConnectivity(format!(
            "failed to open DICOM database {}: {err}",
            path.display()
        ))
    })?;
    Ok(connection)
}

pub struct ConquestCatalog {
    connection: Connection,
    series_filter: Option<String>,
}

impl ConquestCatalog {
    pub fn open(path: &Path, series_filter: Option<String>) -> Result<Self> {
        let catalog = Self::from_connection(open_read_only(path)?, series_filter);
        catalog.check()?;
        Ok(catalog)
    }

    /// `series_filter` is a SQL LIKE pattern matched against SeriesDesc.
    pub fn from_connection(connection: Connection, series_filter: Option<String>) -> Self {
        Self {
            connection,
            series_filter,
        }
    }

    /// Fails with a connectivity error unless the series index is queryable.
    pub fn check(&self) -> Result<()> {
        self.connection
            .query_row("SELECT COUNT(*) FROM DICOMSeries", [], |row| row.get::<_, i64>(0))
            .map_err(|err| {
                ExtractError::StoreConnectivity(format!("DICOMSeries is not readable: {err}"))
            })?;
        Ok(())
    }
}

impl Catalog for ConquestCatalog {
    fn list_series(&self) -> Result<Vec<CatalogSeries>> {
        let mut statement = self
            .connection
            .prepare(
                "
                SELECT SeriesInst, COALESCE(StudyInsta, ''), SeriesDesc
                FROM DICOMSeries
                WHERE Modality = 'SR'
                  AND (?1 IS NULL OR SeriesDesc LIKE ?1)
                ORDER BY StudyInsta ASC, SeriesInst ASC
                ",
            )
            .context("failed to query DICOMSeries")?;

        let mut rows = statement.query(params![self.series_filter])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CatalogSeries {
                series_instance_uid: row.get(0)?,
                study_instance_uid: row.get(1)?,
                description: row.get(2)?,
            });
        }

        debug!(series = out.len(), "listed catalog series");
        Ok(out)
    }
}

/// Resolves `DICOMImages.ObjectFile` entries against the archive's data
/// directory.
pub struct ConquestFileStore {
    connection: Connection,
    root: PathBuf,
}

impl ConquestFileStore {
    pub fn open(path: &Path, root: PathBuf) -> Result<Self> {
        Ok(Self::from_connection(open_read_only(path)?, root))
    }

    pub fn from_connection(connection: Connection, root: PathBuf) -> Self {
        Self { connection, root }
    }

    fn object_path(&self, object_file: &str) -> PathBuf {
        // Conquest stores Windows separators even on other platforms.
        let relative = object_file.trim().replace('\\', "/");
        let candidate = Path::new(&relative);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        }
    }
}

impl FileStore for ConquestFileStore {
    fn resolve(&self, series: &CatalogSeries) -> Result<SeriesFiles> {
        let mut statement = self
            .connection
            .prepare(
                "
                SELECT ObjectFile
                FROM DICOMImages
                WHERE SeriesInst = ?1 AND ObjectFile IS NOT NULL AND ObjectFile <> ''
                ORDER BY CAST(ImageNumbe AS INTEGER) ASC, ObjectFile ASC
                ",
            )
            .context("failed to query DICOMImages")?;

        let mut rows = statement.query(params![series.series_instance_uid])?;
        let mut files = SeriesFiles::default();
        while let Some(row) = rows.next()? {
            let object_file: String = row.get(0)?;
            let path = self.object_path(&object_file);
            if path.is_file() {
                files.present.push(path);
            } else {
                files.missing.push(path);
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn archive() -> Connection {
        let connection = Connection::open_in_memory().expect("in-memory DB should open");
        connection
            .execute_batch(
                "
                CREATE TABLE DICOMSeries (
                  SeriesInst TEXT PRIMARY KEY,
                  StudyInsta TEXT,
                  Modality TEXT,
                  SeriesDesc TEXT
                );
                CREATE TABLE DICOMImages (
                  SOPInstanc TEXT PRIMARY KEY,
                  SeriesInst TEXT,
                  ImageNumbe TEXT,
                  ObjectFile TEXT
                );
                INSERT INTO DICOMSeries VALUES ('2.2', '2', 'SR', 'AI-Rad Companion Lung');
                INSERT INTO DICOMSeries VALUES ('1.9', '1', 'SR', 'AI-Rad Companion Aorta');
                INSERT INTO DICOMSeries VALUES ('1.1', '1', 'CT', 'Thorax 1.0 Br40');
                INSERT INTO DICOMSeries VALUES ('1.5', '1', 'SR', 'Dose Report');
                ",
            )
            .expect("archive tables should be created");
        connection
    }

    #[test]
    fn list_series_returns_sr_series_in_study_order() {
        let catalog = ConquestCatalog::from_connection(archive(), None);
        let series = catalog.list_series().expect("series should list");

        let uids: Vec<&str> = series
            .iter()
            .map(|entry| entry.series_instance_uid.as_str())
            .collect();
        assert_eq!(uids, vec!["1.5", "1.9", "2.2"]);
        assert_eq!(series[1].study_instance_uid, "1");
        assert_eq!(series[1].description.as_deref(), Some("AI-Rad Companion Aorta"));
    }

    #[test]
    fn list_series_applies_description_filter() {
        let catalog = ConquestCatalog::from_connection(archive(), Some("AI-Rad%".to_string()));
        let series = catalog.list_series().expect("series should list");

        let uids: Vec<&str> = series
            .iter()
            .map(|entry| entry.series_instance_uid.as_str())
            .collect();
        assert_eq!(uids, vec!["1.9", "2.2"]);
    }

    #[test]
    fn check_fails_without_series_table() {
        let connection = Connection::open_in_memory().expect("in-memory DB should open");
        let catalog = ConquestCatalog::from_connection(connection, None);

        let err = catalog.check().expect_err("empty database must fail");
        assert!(matches!(
            err.downcast_ref::<ExtractError>(),
            Some(ExtractError::StoreConnectivity(_))
        ));
    }

    #[test]
    fn resolve_splits_present_and_missing_files() {
        let root = std::env::temp_dir().join(format!("airc-extract-files-{}", std::process::id()));
        fs::create_dir_all(root.join("patient1")).expect("temp dir should be created");
        fs::write(root.join("patient1").join("a.dcm"), b"DICM").expect("file should be written");

        let connection = archive();
        connection
            .execute_batch(
                "
                INSERT INTO DICOMImages VALUES ('9.1', '1.9', '2', 'patient1\\b.dcm');
                INSERT INTO DICOMImages VALUES ('9.0', '1.9', '1', 'patient1\\a.dcm');
                INSERT INTO DICOMImages VALUES ('9.2', '2.2', '1', 'patient2\\c.dcm');
                ",
            )
            .expect("images should be inserted");
        let store = ConquestFileStore::from_connection(connection, root.clone());

        let series = CatalogSeries {
            study_instance_uid: "1".to_string(),
            series_instance_uid: "1.9".to_string(),
            description: None,
        };
        let files = store.resolve(&series).expect("files should resolve");

        assert_eq!(files.present, vec![root.join("patient1").join("a.dcm")]);
        assert_eq!(files.missing, vec![root.join("patient1/b.dcm")]);
        assert!(!files.is_complete());

        fs::remove_dir_all(&root).expect("temp dir should be removed");
    }

    #[test]
    fn series_without_files_is_incomplete() {
        assert!(!SeriesFiles::default().is_complete());
    }
}
