//! Maps parsed SR trees onto the relational record shapes.

use std::collections::BTreeMap;

use serde::Serialize;

pub mod mapping;
mod normalize;
#[cfg(test)]
mod tests;

pub use normalize::normalize;

/// Finding tables of the output store. The identity table `main` is not
/// listed; every record has exactly one identity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingTable {
    Aorta,
    Spine,
    Cardio,
    Lesions,
    Lung,
}

impl FindingTable {
    pub const ALL: [FindingTable; 5] = [
        FindingTable::Aorta,
        FindingTable::Spine,
        FindingTable::Cardio,
        FindingTable::Lesions,
        FindingTable::Lung,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Aorta => "aorta",
            Self::Spine => "spine",
            Self::Cardio => "cardio",
            Self::Lesions => "lesions",
            Self::Lung => "lung",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Measurement { value: f64, unit: String },
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingRow {
    pub table: FindingTable,
    /// Position among the rows of `table` for this series, in report order.
    pub ordinal: u32,
    pub category: &'static str,
    pub fields: BTreeMap<&'static str, FieldValue>,
}

impl FindingRow {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeriesIdentity {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
    pub study_date: Option<String>,
    pub patient_sex: Option<String>,
}

/// Everything extracted from one series, ready for a single upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRecord {
    pub identity: SeriesIdentity,
    pub categories: Vec<&'static str>,
    pub findings: Vec<FindingRow>,
    pub source_digest: Option<String>,
}

impl ReportRecord {
    pub fn rows_in(&self, table: FindingTable) -> impl Iterator<Item = &FindingRow> {
        self.findings.iter().filter(move |row| row.table == table)
    }
}
