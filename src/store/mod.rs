//! SQLite output store: one identity table plus one table per finding group.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, params, params_from_iter};
use tracing::debug;

use crate::error::ExtractError;
use crate::template::{FieldValue, FindingRow, FindingTable, ReportRecord, SeriesIdentity};
use crate::util::now_utc_string;

mod schema;

pub(crate) use schema::DB_SCHEMA_VERSION;

/// Where extracted reports are committed, and what it already holds.
pub trait ReportSink {
    /// Series UIDs that already have a committed identity row.
    fn known_series(&self) -> Result<HashSet<String>>;

    /// Replaces everything stored for the record's series in one transaction.
    fn upsert(&mut self, record: &ReportRecord) -> Result<()>;
}

pub struct ReportStore {
    connection: Connection,
}

impl ReportStore {
    /// Opens an existing data database. A missing file is a connectivity
    /// failure rather than an invitation to create an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|err| {
            ExtractError::StoreConnectivity(format!(
                "failed to open data database {}: {err}",
                path.display()
            ))
        })?;
        schema::configure_connection(&connection)?;
        Ok(Self::from_connection(connection))
    }

    pub fn create(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)
            .with_context(|| format!("failed to create data database {}", path.display()))?;
        schema::configure_connection(&connection)?;
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn ensure_schema(&self) -> Result<()> {
        schema::ensure_schema(&self.connection)
    }

    /// Row counts for `main` followed by every finding table.
    pub fn table_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(FindingTable::ALL.len() + 1);
        let tables = std::iter::once("main").chain(FindingTable::ALL.iter().map(|table| table.name()));
        for name in tables {
            let count: i64 = self
                .connection
                .query_row(&format!("SELECT COUNT(*) FROM {name}"), [], |row| row.get(0))
                .with_context(|| format!("failed to count rows in {name}"))?;
            counts.push((name, count));
        }
        Ok(counts)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl ReportSink for ReportStore {
    fn known_series(&self) -> Result<HashSet<String>> {
        let mut statement = self
            .connection
            .prepare("SELECT series_uid FROM main")
            .context("failed to query recorded series")?;
        let mut rows = statement.query([])?;

        let mut known = HashSet::new();
        while let Some(row) = rows.next()? {
            known.insert(row.get::<_, String>(0)?);
        }
        Ok(known)
    }

    fn upsert(&mut self, record: &ReportRecord) -> Result<()> {
        let identity = &record.identity;
        let tx = self.connection.transaction()?;

        for table in FindingTable::ALL {
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE study_uid = ?1 AND series_uid = ?2",
                    table.name()
                ),
                params![identity.study_instance_uid, identity.series_instance_uid],
            )
            .with_context(|| format!("failed to clear {} rows", table.name()))?;
        }

        for row in &record.findings {
            insert_finding(&tx, identity, row)?;
        }

        upsert_identity(&tx, record)?;
        tx.commit()
            .with_context(|| format!("failed to commit series {}", identity.series_instance_uid))?;

        debug!(
            series = %identity.series_instance_uid,
            findings = record.findings.len(),
            "committed series"
        );
        Ok(())
    }
}

fn insert_finding(connection: &Connection, identity: &SeriesIdentity, row: &FindingRow) -> Result<()> {
    let mut columns: Vec<String> = ["study_uid", "series_uid", "ordinal", "category"]
        .iter()
        .map(|column| (*column).to_string())
        .collect();
    let mut values = vec![
        Value::Text(identity.study_instance_uid.clone()),
        Value::Text(identity.series_instance_uid.clone()),
        Value::Integer(i64::from(row.ordinal)),
        Value::Text(row.category.to_string()),
    ];

    for (field, value) in &row.fields {
        match value {
            FieldValue::Measurement { value, unit } => {
                columns.push((*field).to_string());
                values.push(Value::Real(*value));
                columns.push(format!("{field}_unit"));
                values.push(Value::Text(unit.clone()));
            }
            FieldValue::Text(text) => {
                columns.push((*field).to_string());
                values.push(Value::Text(text.clone()));
            }
        }
    }

    let placeholders: Vec<String> = (1..=values.len()).map(|index| format!("?{index}")).collect();
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        row.table.name(),
        columns.join(", "),
        placeholders.join(", ")
    );

    connection
        .execute(&sql, params_from_iter(values))
        .with_context(|| format!("failed to insert {} row {}", row.table.name(), row.ordinal))?;
    Ok(())
}

fn upsert_identity(connection: &Connection, record: &ReportRecord) -> Result<()> {
    let identity = &record.identity;
    let count = |table: FindingTable| record.rows_in(table).count() as i64;

    connection
        .execute(
            "
            INSERT INTO main(
              study_uid, series_uid, mrn, accession, study_date, sex,
              aorta, spine, cardio, lesions, lung, categories, source_digest, extracted_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(study_uid, series_uid) DO UPDATE SET
              mrn=excluded.mrn,
              accession=excluded.accession,
              study_date=excluded.study_date,
              sex=excluded.sex,
              aorta=excluded.aorta,
              spine=excluded.spine,
              cardio=excluded.cardio,
              lesions=excluded.lesions,
              lung=excluded.lung,
              categories=excluded.categories,
              source_digest=excluded.source_digest,
              extracted_at=excluded.extracted_at
            ",
            params![
                identity.study_instance_uid,
                identity.series_instance_uid,
                identity.patient_id,
                identity.accession_number,
                identity.study_date,
                identity.patient_sex,
                count(FindingTable::Aorta),
                count(FindingTable::Spine),
                count(FindingTable::Cardio),
                count(FindingTable::Lesions),
                count(FindingTable::Lung),
                record.categories.join(","),
                record.source_digest,
                now_utc_string(),
            ],
        )
        .context("failed to upsert main row")?;
    Ok(())
}
