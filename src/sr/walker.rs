use std::path::PathBuf;

use dicom::core::Tag;
use dicom::dictionary_std::tags;
use dicom::object::{InMemDicomObject, open_file};
use tracing::{debug, warn};

use super::content::{
    CodedConcept, ContentItem, ContentValue, DocumentHeader, Measurement, RelationshipType,
    Report, SrDocument,
};
use crate::error::ExtractError;
use crate::util::{combined_digest, sha256_file};

/// Nesting limit for content sequences; vendor reports stay far below it.
const MAX_CONTENT_DEPTH: usize = 64;

/// Loads every SR file of one series into a [`Report`], keeping file order.
pub fn load_report(paths: &[PathBuf]) -> Result<Report, ExtractError> {
    let mut documents = Vec::with_capacity(paths.len());
    let mut digests = Vec::with_capacity(paths.len());

    for path in paths {
        let source_name = path.display().to_string();
        let object = open_file(path).map_err(|err| {
            ExtractError::malformed(&source_name, format!("failed to read DICOM file: {err}"))
        })?;
        documents.push(decode_document(&object, &source_name)?);

        match sha256_file(path) {
            Ok(digest) => digests.push(digest),
            Err(err) => warn!(path = %source_name, error = %err, "failed to hash SR file"),
        }
    }

    let source_digest = (digests.len() == paths.len() && !digests.is_empty())
        .then(|| combined_digest(digests.iter().map(String::as_str)));

    Ok(Report {
        documents,
        source_digest,
    })
}

/// Decodes one SR dataset. The dataset itself is the root CONTAINER; its
/// ContentSequence holds the first level of the tree.
pub fn decode_document(
    object: &InMemDicomObject,
    source_name: &str,
) -> Result<SrDocument, ExtractError> {
    let value_type = string_attr(object, tags::VALUE_TYPE)
        .ok_or_else(|| ExtractError::malformed(source_name, "dataset has no ValueType"))?;
    if value_type != "CONTAINER" {
        return Err(ExtractError::malformed(
            source_name,
            format!("root ValueType is {value_type}, expected CONTAINER"),
        ));
    }
    if object.element(tags::CONTENT_SEQUENCE).is_err() {
        return Err(ExtractError::malformed(
            source_name,
            "dataset has no ContentSequence",
        ));
    }

    let children = decode_children(object, source_name, 1)?;
    let root = ContentItem {
        relationship: None,
        concept_name: first_code(object, tags::CONCEPT_NAME_CODE_SEQUENCE),
        value: ContentValue::Container(children),
    };

    debug!(
        source = %source_name,
        items = root.children().len(),
        "decoded SR content tree"
    );

    Ok(SrDocument {
        source_name: source_name.to_string(),
        header: read_header(object),
        root,
    })
}

fn decode_children(
    object: &InMemDicomObject,
    source_name: &str,
    depth: usize,
) -> Result<Vec<ContentItem>, ExtractError> {
    if depth > MAX_CONTENT_DEPTH {
        return Err(ExtractError::malformed(
            source_name,
            format!("content tree deeper than {MAX_CONTENT_DEPTH} levels"),
        ));
    }

    sequence_items(object, tags::CONTENT_SEQUENCE)
        .iter()
        .map(|item| decode_item(item, source_name, depth))
        .collect()
}

fn decode_item(
    item: &InMemDicomObject,
    source_name: &str,
    depth: usize,
) -> Result<ContentItem, ExtractError> {
    let value_type = string_attr(item, tags::VALUE_TYPE).ok_or_else(|| {
        ExtractError::malformed(source_name, format!("content item at depth {depth} has no ValueType"))
    })?;
    let relationship = string_attr(item, tags::RELATIONSHIP_TYPE).map(|raw| RelationshipType::parse(&raw));
    let concept_name = first_code(item, tags::CONCEPT_NAME_CODE_SEQUENCE);

    let value = match value_type.as_str() {
        "CONTAINER" => ContentValue::Container(decode_children(item, source_name, depth + 1)?),
        "TEXT" => ContentValue::Text(string_attr(item, tags::TEXT_VALUE).unwrap_or_default()),
        "NUM" => ContentValue::Num(decode_measurement(item, source_name)?),
        "CODE" => {
            let code = first_code(item, tags::CONCEPT_CODE_SEQUENCE).ok_or_else(|| {
                ExtractError::malformed(source_name, "CODE item has no ConceptCodeSequence")
            })?;
            ContentValue::Code(code)
        }
        "UIDREF" => ContentValue::UidRef(string_attr(item, tags::UID).unwrap_or_default()),
        "DATETIME" => ContentValue::DateTime(string_attr(item, tags::DATE_TIME).unwrap_or_default()),
        "DATE" => ContentValue::Date(string_attr(item, tags::DATE).unwrap_or_default()),
        "TIME" => ContentValue::Time(string_attr(item, tags::TIME).unwrap_or_default()),
        "PNAME" => ContentValue::PName(string_attr(item, tags::PERSON_NAME).unwrap_or_default()),
        "IMAGE" | "COMPOSITE" | "WAVEFORM" => ContentValue::Reference {
            value_type: value_type.clone(),
            sop_instance_uid: sequence_items(item, tags::REFERENCED_SOP_SEQUENCE)
                .first()
                .and_then(|reference| string_attr(reference, tags::REFERENCED_SOP_INSTANCE_UID)),
        },
        _ => ContentValue::Unsupported(value_type.clone()),
    };

    if value_type != "CONTAINER" && !sequence_items(item, tags::CONTENT_SEQUENCE).is_empty() {
        debug!(
            source = %source_name,
            value_type = %value_type,
            "ignoring content nested under a leaf item"
        );
    }

    Ok(ContentItem {
        relationship,
        concept_name,
        value,
    })
}

fn decode_measurement(
    item: &InMemDicomObject,
    source_name: &str,
) -> Result<Option<Measurement>, ExtractError> {
    let Some(measured) = sequence_items(item, tags::MEASURED_VALUE_SEQUENCE).first() else {
        return Ok(None);
    };

    let raw = string_attr(measured, tags::NUMERIC_VALUE)
        .ok_or_else(|| ExtractError::malformed(source_name, "measured value has no NumericValue"))?;
    let value = raw.trim().parse::<f64>().map_err(|err| {
        ExtractError::malformed(source_name, format!("invalid NumericValue {raw:?}: {err}"))
    })?;
    let unit = first_code(measured, tags::MEASUREMENT_UNITS_CODE_SEQUENCE).ok_or_else(|| {
        ExtractError::malformed(source_name, "measured value has no MeasurementUnitsCodeSequence")
    })?;

    Ok(Some(Measurement { value, unit }))
}

fn read_header(object: &InMemDicomObject) -> DocumentHeader {
    DocumentHeader {
        patient_id: string_attr(object, tags::PATIENT_ID),
        accession_number: string_attr(object, tags::ACCESSION_NUMBER),
        study_instance_uid: string_attr(object, tags::STUDY_INSTANCE_UID),
        series_instance_uid: string_attr(object, tags::SERIES_INSTANCE_UID),
        sop_instance_uid: string_attr(object, tags::SOP_INSTANCE_UID),
        patient_sex: string_attr(object, tags::PATIENT_SEX),
        study_date: string_attr(object, tags::STUDY_DATE),
    }
}

fn first_code(object: &InMemDicomObject, sequence_tag: Tag) -> Option<CodedConcept> {
    let item = sequence_items(object, sequence_tag).first()?;
    let code_value = string_attr(item, tags::CODE_VALUE)
        .or_else(|| string_attr(item, tags::LONG_CODE_VALUE))
        .or_else(|| string_attr(item, tags::URN_CODE_VALUE))?;

    Some(CodedConcept {
        code_value,
        coding_scheme: string_attr(item, tags::CODING_SCHEME_DESIGNATOR).unwrap_or_default(),
        code_meaning: string_attr(item, tags::CODE_MEANING).unwrap_or_default(),
    })
}

fn sequence_items(object: &InMemDicomObject, tag: Tag) -> &[InMemDicomObject] {
    object
        .element(tag)
        .ok()
        .and_then(|element| element.items())
        .unwrap_or(&[])
}

fn string_attr(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let element = object.element(tag).ok()?;
    let value = element.to_str().ok()?;
    let trimmed = value.trim_matches(|ch: char| ch == '\0' || ch.is_whitespace());
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
