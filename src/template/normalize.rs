use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::mapping::{
    self, FieldKind, FieldRule, GroupRule, IMAGE_MEASUREMENTS, MEASUREMENT_GROUP, Transform,
    required_fields,
};
use super::{FieldValue, FindingRow, FindingTable, ReportRecord, SeriesIdentity};
use crate::error::ExtractError;
use crate::model::CatalogSeries;
use crate::sr::{ContentItem, ContentValue, DocumentHeader, Report};

/// Flattens the documents of one series into identity and finding rows.
///
/// Unmapped concepts are skipped, and a finding group that lacks its table's
/// required fields produces no row. Identity problems are the only hard
/// failure.
pub fn normalize(report: &Report, expected: &CatalogSeries) -> Result<ReportRecord, ExtractError> {
    let identity = resolve_identity(report, expected)?;
    let mut collector = FindingCollector::new(&identity.series_instance_uid);

    for document in &report.documents {
        let document_rule = document_category(&document.root);
        if let Some(rule) = document_rule {
            collector.note_category(rule.category);
        }
        match group_rule_for(&document.root, document_rule) {
            Some(rule) => collector.collect_group(&document.root, rule, &BTreeMap::new()),
            None => collector.visit(&document.root, document_rule),
        }
    }

    debug!(
        series = %identity.series_instance_uid,
        documents = report.documents.len(),
        findings = collector.rows.len(),
        "normalized report"
    );

    let FindingCollector {
        categories, rows, ..
    } = collector;
    Ok(ReportRecord {
        identity,
        categories,
        findings: rows,
        source_digest: report.source_digest.clone(),
    })
}

/// A CODE item directly under the root whose value is a category code marks
/// the whole document as that category.
fn document_category(root: &ContentItem) -> Option<&'static GroupRule> {
    root.children().iter().find_map(|child| match &child.value {
        ContentValue::Code(code) => mapping::group_rule(&code.code_value),
        _ => None,
    })
}

fn group_rule_for(
    node: &ContentItem,
    inherited: Option<&'static GroupRule>,
) -> Option<&'static GroupRule> {
    if !node.is_container() {
        return None;
    }
    let concept = node.concept_code()?;
    mapping::group_rule(concept).or_else(|| {
        if concept == MEASUREMENT_GROUP {
            inherited
        } else {
            None
        }
    })
}

/// Rule for `child` seen under `parent`. Besides explicit group concepts,
/// every container directly under an image measurements container is one
/// finding of the surrounding category, whatever its own concept code.
fn child_group_rule(
    parent: &ContentItem,
    child: &ContentItem,
    context: Option<&'static GroupRule>,
) -> Option<&'static GroupRule> {
    group_rule_for(child, context).or_else(|| {
        if child.is_container() && parent.concept_code() == Some(IMAGE_MEASUREMENTS) {
            context
        } else {
            None
        }
    })
}

type FieldMap = BTreeMap<&'static str, FieldValue>;

struct FindingCollector {
    series_uid: String,
    next_ordinal: HashMap<FindingTable, u32>,
    categories: Vec<&'static str>,
    rows: Vec<FindingRow>,
}

impl FindingCollector {
    fn new(series_uid: &str) -> Self {
        Self {
            series_uid: series_uid.to_string(),
            next_ordinal: HashMap::new(),
            categories: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn note_category(&mut self, category: &'static str) {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
    }

    fn visit(&mut self, node: &ContentItem, document_rule: Option<&'static GroupRule>) {
        for child in node.children() {
            match child_group_rule(node, child, document_rule) {
                Some(rule) => self.collect_group(child, rule, &FieldMap::new()),
                None => self.visit(child, document_rule),
            }
        }
    }

    /// Fields found directly in a group are context for the groups nested
    /// in it. A group with nested groups of its own table yields only their
    /// rows, each carrying that context; otherwise the group is one row,
    /// emitted before any nested rows of other tables.
    fn collect_group(&mut self, group: &ContentItem, rule: &'static GroupRule, context: &FieldMap) {
        self.note_category(rule.category);

        let mut own = FieldMap::new();
        let mut nested = Vec::new();
        self.gather(group, rule, &mut own, &mut nested);

        let mut fields = context.clone();
        fields.extend(own);

        let splits_into_nested = nested.iter().any(|(_, child_rule)| child_rule.table == rule.table);
        if !splits_into_nested {
            self.emit(rule, fields.clone());
        }

        let empty = FieldMap::new();
        for (child, child_rule) in nested {
            let child_context = if child_rule.table == rule.table {
                &fields
            } else {
                &empty
            };
            self.collect_group(child, child_rule, child_context);
        }
    }

    fn gather<'n>(
        &self,
        node: &'n ContentItem,
        rule: &'static GroupRule,
        fields: &mut FieldMap,
        nested: &mut Vec<(&'n ContentItem, &'static GroupRule)>,
    ) {
        for child in node.children() {
            if let Some(child_rule) = child_group_rule(node, child, Some(rule)) {
                nested.push((child, child_rule));
            } else if child.is_container() {
                self.gather(child, rule, fields, nested);
            } else {
                self.apply_field(child, rule, fields);
            }
        }
    }

    fn apply_field(
        &self,
        item: &ContentItem,
        rule: &'static GroupRule,
        fields: &mut FieldMap,
    ) {
        let Some(concept) = item.concept_code() else {
            return;
        };
        let Some(field_rule) = mapping::field_rule(rule.table, concept) else {
            return;
        };
        let Some(value) = field_value(item, field_rule) else {
            debug!(
                series = %self.series_uid,
                field = field_rule.field,
                value_type = item.value_type(),
                "content item carries no usable value"
            );
            return;
        };

        if let Some(existing) = fields.get(field_rule.field) {
            if existing != &value {
                warn!(
                    series = %self.series_uid,
                    table = rule.table.name(),
                    field = field_rule.field,
                    "conflicting values in one finding group, keeping the last"
                );
            }
        }
        fields.insert(field_rule.field, value);
    }

    fn emit(&mut self, rule: &'static GroupRule, fields: FieldMap) {
        if fields.is_empty() {
            debug!(
                series = %self.series_uid,
                table = rule.table.name(),
                "finding group without mapped fields"
            );
            return;
        }

        let missing: Vec<&str> = required_fields(rule.table)
            .iter()
            .copied()
            .filter(|field| !fields.contains_key(field))
            .collect();
        if !missing.is_empty() {
            debug!(
                series = %self.series_uid,
                table = rule.table.name(),
                missing = ?missing,
                "finding group lacks required fields"
            );
            return;
        }

        let counter = self.next_ordinal.entry(rule.table).or_insert(0);
        let ordinal = *counter;
        *counter += 1;

        self.rows.push(FindingRow {
            table: rule.table,
            ordinal,
            category: rule.category,
            fields,
        });
    }
}

fn field_value(item: &ContentItem, rule: &FieldRule) -> Option<FieldValue> {
    match rule.kind {
        FieldKind::Measurement => {
            let ContentValue::Num(Some(measurement)) = &item.value else {
                return None;
            };
            let (value, unit) = match rule.transform {
                Transform::Unit(normalize_unit) => {
                    normalize_unit(measurement.value, &measurement.unit.code_value)
                }
                _ => (measurement.value, measurement.unit.code_value.clone()),
            };
            Some(FieldValue::Measurement { value, unit })
        }
        FieldKind::Text => {
            if let (Transform::CodeLabels(labels), ContentValue::Code(code)) =
                (rule.transform, &item.value)
            {
                return match labels.iter().find(|(candidate, _)| *candidate == code.code_value) {
                    Some((_, Some(label))) => Some(FieldValue::Text((*label).to_string())),
                    Some((_, None)) => None,
                    None => Some(FieldValue::Text(format!(
                        "{}, {}",
                        code.code_value, code.code_meaning
                    ))),
                };
            }
            item.text_value()
                .filter(|value| !value.is_empty())
                .map(|value| FieldValue::Text(value.to_string()))
        }
    }
}

fn resolve_identity(
    report: &Report,
    expected: &CatalogSeries,
) -> Result<SeriesIdentity, ExtractError> {
    let expected_series = expected.series_instance_uid.as_str();
    if report.documents.is_empty() {
        return Err(ExtractError::identity(
            expected_series,
            "report contains no documents",
        ));
    }

    let series_instance_uid = agreed_uid(report, expected_series, "SeriesInstanceUID", |header| {
        header.series_instance_uid.as_deref()
    })?;
    let study_instance_uid = agreed_uid(report, expected_series, "StudyInstanceUID", |header| {
        header.study_instance_uid.as_deref()
    })?;

    if series_instance_uid != expected.series_instance_uid {
        return Err(ExtractError::identity(
            expected_series,
            format!("documents belong to series {series_instance_uid}"),
        ));
    }
    if !expected.study_instance_uid.is_empty() && study_instance_uid != expected.study_instance_uid
    {
        return Err(ExtractError::identity(
            expected_series,
            format!(
                "documents belong to study {study_instance_uid}, catalog lists {}",
                expected.study_instance_uid
            ),
        ));
    }

    let patient_id = last_document_wins(report, expected_series, "PatientID", |header| {
        header.patient_id.as_deref()
    });
    let accession_number = last_document_wins(report, expected_series, "AccessionNumber", |header| {
        header.accession_number.as_deref()
    });
    let patient_sex = last_document_wins(report, expected_series, "PatientSex", |header| {
        header.patient_sex.as_deref()
    });
    let study_date = last_document_wins(report, expected_series, "StudyDate", |header| {
        header.study_date.as_deref()
    })
    .map(|raw| normalize_study_date(&raw, expected_series));

    Ok(SeriesIdentity {
        study_instance_uid,
        series_instance_uid,
        patient_id,
        accession_number,
        study_date,
        patient_sex,
    })
}

fn agreed_uid(
    report: &Report,
    series_uid: &str,
    attribute: &str,
    read: impl Fn(&DocumentHeader) -> Option<&str>,
) -> Result<String, ExtractError> {
    let mut resolved: Option<&str> = None;
    for document in &report.documents {
        let Some(value) = read(&document.header) else {
            continue;
        };
        match resolved {
            Some(existing) if existing != value => {
                return Err(ExtractError::identity(
                    series_uid,
                    format!("{attribute} differs between documents: {existing} vs {value}"),
                ));
            }
            _ => resolved = Some(value),
        }
    }

    resolved
        .map(ToOwned::to_owned)
        .ok_or_else(|| ExtractError::identity(series_uid, format!("no document carries {attribute}")))
}

fn last_document_wins(
    report: &Report,
    series_uid: &str,
    attribute: &str,
    read: impl Fn(&DocumentHeader) -> Option<&str>,
) -> Option<String> {
    let mut resolved: Option<&str> = None;
    for document in &report.documents {
        let Some(value) = read(&document.header) else {
            continue;
        };
        if let Some(existing) = resolved {
            if existing != value {
                warn!(
                    series = %series_uid,
                    attribute,
                    previous = %existing,
                    current = %value,
                    source = %document.source_name,
                    "documents disagree, keeping the last document's value"
                );
            }
        }
        resolved = Some(value);
    }
    resolved.map(ToOwned::to_owned)
}

fn normalize_study_date(raw: &str, series_uid: &str) -> String {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y%m%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    if NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() {
        return raw.to_string();
    }
    warn!(series = %series_uid, study_date = %raw, "unrecognized StudyDate, storing as-is");
    raw.to_string()
}
