use anyhow::{Context, Result, bail};
use rusqlite::Connection;

use crate::template::FindingTable;
use crate::template::mapping::{FieldKind, table_fields};
use crate::util::now_utc_string;

pub(crate) const DB_SCHEMA_VERSION: &str = "1.0.0";

pub(super) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub(super) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS main (
              study_uid TEXT NOT NULL,
              series_uid TEXT NOT NULL,
              mrn TEXT,
              accession TEXT,
              study_date TEXT,
              sex TEXT,
              aorta INTEGER NOT NULL DEFAULT 0,
              spine INTEGER NOT NULL DEFAULT 0,
              cardio INTEGER NOT NULL DEFAULT 0,
              lesions INTEGER NOT NULL DEFAULT 0,
              lung INTEGER NOT NULL DEFAULT 0,
              categories TEXT,
              source_digest TEXT,
              extracted_at TEXT NOT NULL,
              PRIMARY KEY (study_uid, series_uid)
            );

            CREATE INDEX IF NOT EXISTS idx_main_series ON main(series_uid);
            ",
        )
        .context("failed to create main table")?;

    for table in FindingTable::ALL {
        connection
            .execute(&finding_table_ddl(table), [])
            .with_context(|| format!("failed to create table {}", table.name()))?;
        for column in finding_columns(table) {
            ensure_column_exists(connection, table.name(), &column)?;
        }
    }

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

/// Column definitions for the mapped fields of a finding table; every
/// measurement gets a companion `<field>_unit` column.
pub(super) fn finding_columns(table: FindingTable) -> Vec<String> {
    let mut columns = Vec::new();
    for (field, kind) in table_fields(table) {
        match kind {
            FieldKind::Measurement => {
                columns.push(format!("{field} REAL"));
                columns.push(format!("{field}_unit TEXT"));
            }
            FieldKind::Text => columns.push(format!("{field} TEXT")),
        }
    }
    columns
}

fn finding_table_ddl(table: FindingTable) -> String {
    let mut definitions = vec![
        "study_uid TEXT NOT NULL".to_string(),
        "series_uid TEXT NOT NULL".to_string(),
        "ordinal INTEGER NOT NULL".to_string(),
        "category TEXT NOT NULL".to_string(),
    ];
    definitions.extend(finding_columns(table));
    definitions.push("PRIMARY KEY (study_uid, series_uid, ordinal)".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
        table.name(),
        definitions.join(",\n  ")
    )
}

pub(super) fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_name) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection
        .execute(&alter_sql, [])
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;

    Ok(())
}
