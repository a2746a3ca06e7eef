//! Concept-code layout of the AI-Rad Companion chest CT report template.
//!
//! A new template revision is supported by adding entries here. Columns of the
//! finding tables are derived from [`FIELD_RULES`], so a new field also gets a
//! new column the next time the schema is ensured.

use super::FindingTable;

/// Generic TID 1501 measurement group.
pub const MEASUREMENT_GROUP: &str = "125007";

/// TID 1500 "Imaging Measurements" container holding one container per
/// finding.
pub const IMAGE_MEASUREMENTS: &str = "126010";

/// Finding site, used by every category to locate a measurement.
const FINDING_SITE: &str = "363698007";

/// Container concept (or document category code) that starts a finding row.
#[derive(Debug, Clone, Copy)]
pub struct GroupRule {
    pub concept: &'static str,
    pub table: FindingTable,
    pub category: &'static str,
}

pub const GROUP_RULES: &[GroupRule] = &[
    GroupRule {
        concept: "CHESTCT0203",
        table: FindingTable::Lung,
        category: "lung_parenchyma",
    },
    GroupRule {
        concept: "CHESTCT0304",
        table: FindingTable::Cardio,
        category: "coronary_calcium",
    },
    GroupRule {
        concept: "CHESTCT0410",
        table: FindingTable::Aorta,
        category: "aortic_diameters",
    },
    GroupRule {
        concept: "CHESTCT0502",
        table: FindingTable::Spine,
        category: "spine_measurements",
    },
    GroupRule {
        concept: "CHESTCT0611",
        table: FindingTable::Lung,
        category: "pulmonary_densities",
    },
    GroupRule {
        concept: "CHESTCT0999",
        table: FindingTable::Lesions,
        category: "lung_lesions",
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Measurement,
    Text,
}

pub type UnitNormalizer = fn(f64, &str) -> (f64, String);

#[derive(Debug, Clone, Copy)]
pub enum Transform {
    None,
    Unit(UnitNormalizer),
    /// Coded value → label. A `None` label marks a code that is not a
    /// measurement site and must be ignored. Unknown codes fall back to
    /// `"<code>, <meaning>"`.
    CodeLabels(&'static [(&'static str, Option<&'static str>)]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub table: FindingTable,
    pub concept: &'static str,
    pub field: &'static str,
    pub kind: FieldKind,
    pub transform: Transform,
}

const fn measurement(table: FindingTable, concept: &'static str, field: &'static str) -> FieldRule {
    FieldRule {
        table,
        concept,
        field,
        kind: FieldKind::Measurement,
        transform: Transform::None,
    }
}

const fn text(table: FindingTable, concept: &'static str, field: &'static str) -> FieldRule {
    FieldRule {
        table,
        concept,
        field,
        kind: FieldKind::Text,
        transform: Transform::None,
    }
}

pub const AORTA_SITES: &[(&str, Option<&str>)] = &[
    ("CHESTCT0408", Some("max_ascending")),
    ("CHESTCT0409", Some("max_descending")),
    ("C33557", Some("sinus_of_valsalva")),
    ("RID579", Some("sinotubular_junction")),
    ("CHESTCT0401", Some("mid_ascending")),
    ("CHESTCT0402", Some("proximal_arch")),
    ("CHESTCT0403", Some("mid_arch")),
    ("CHESTCT0404", Some("proximal_descending")),
    ("CHESTCT0405", Some("mid_descending")),
    ("CHESTCT0406", Some("diaphragm_level")),
    ("RID905", Some("celiac_artery_origin")),
    // summary entry for the PACS viewer
    ("RID480", None),
];

pub fn centimeters_to_millimeters(value: f64, unit: &str) -> (f64, String) {
    if unit == "cm" {
        (value * 10.0, "mm".to_string())
    } else {
        (value, unit.to_string())
    }
}

pub const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        table: FindingTable::Aorta,
        concept: FINDING_SITE,
        field: "site",
        kind: FieldKind::Text,
        transform: Transform::CodeLabels(AORTA_SITES),
    },
    FieldRule {
        table: FindingTable::Aorta,
        concept: "RID13432",
        field: "diameter",
        kind: FieldKind::Measurement,
        transform: Transform::Unit(centimeters_to_millimeters),
    },
    // Field names below follow the output table columns. The CHESTCT codes
    // for spine, cardio, lesion and lung fields are provisional until checked
    // against vendor sample reports; only the aorta codes are confirmed.
    text(FindingTable::Spine, FINDING_SITE, "vertebra"),
    text(FindingTable::Spine, "106233006", "direction"),
    measurement(FindingTable::Spine, "121206", "length"),
    text(FindingTable::Spine, "CHESTCT0501", "status"),
    text(FindingTable::Cardio, FINDING_SITE, "site"),
    measurement(FindingTable::Cardio, "CHESTCT0301", "heart_volume"),
    measurement(FindingTable::Cardio, "CHESTCT0302", "calcification_volume"),
    measurement(FindingTable::Cardio, "CHESTCT0303", "agatston_score"),
    text(FindingTable::Lesions, "112039", "lesion_id"),
    text(FindingTable::Lesions, FINDING_SITE, "location"),
    text(FindingTable::Lesions, "CHESTCT0901", "review_status"),
    measurement(FindingTable::Lesions, "CHESTCT0902", "max_2d_diameter"),
    measurement(FindingTable::Lesions, "CHESTCT0903", "min_2d_diameter"),
    measurement(FindingTable::Lesions, "CHESTCT0904", "mean_2d_diameter"),
    measurement(FindingTable::Lesions, "CHESTCT0905", "max_3d_diameter"),
    measurement(FindingTable::Lesions, "118565006", "volume"),
    text(FindingTable::Lung, FINDING_SITE, "location"),
    text(FindingTable::Lung, "RID4799", "emphysema"),
    measurement(FindingTable::Lung, "CHESTCT0601", "opacity_score"),
    measurement(FindingTable::Lung, "118565006", "volume"),
    measurement(FindingTable::Lung, "CHESTCT0602", "opacity_volume"),
    measurement(FindingTable::Lung, "CHESTCT0603", "opacity_percent"),
    measurement(FindingTable::Lung, "CHESTCT0604", "high_opacity_volume"),
    measurement(FindingTable::Lung, "CHESTCT0605", "high_opacity_percent"),
    measurement(FindingTable::Lung, "CHESTCT0606", "mean_hu"),
    measurement(FindingTable::Lung, "CHESTCT0607", "mean_hu_opacity"),
    measurement(FindingTable::Lung, "CHESTCT0608", "low_parenchyma_hu_percent"),
];

/// Fields that must all be present before a group yields a row. Tables not
/// listed need at least one mapped field.
pub const REQUIRED_FIELDS: &[(FindingTable, &[&str])] =
    &[(FindingTable::Aorta, &["site", "diameter"])];

pub fn group_rule(concept: &str) -> Option<&'static GroupRule> {
    GROUP_RULES.iter().find(|rule| rule.concept == concept)
}

pub fn field_rule(table: FindingTable, concept: &str) -> Option<&'static FieldRule> {
    FIELD_RULES
        .iter()
        .find(|rule| rule.table == table && rule.concept == concept)
}

pub fn required_fields(table: FindingTable) -> &'static [&'static str] {
    REQUIRED_FIELDS
        .iter()
        .find(|(candidate, _)| *candidate == table)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

/// Distinct fields of a table in rule order, which is also column order.
pub fn table_fields(table: FindingTable) -> Vec<(&'static str, FieldKind)> {
    let mut fields: Vec<(&'static str, FieldKind)> = Vec::new();
    for rule in FIELD_RULES.iter().filter(|rule| rule.table == table) {
        if !fields.iter().any(|(field, _)| *field == rule.field) {
            fields.push((rule.field, rule.kind));
        }
    }
    fields
}
