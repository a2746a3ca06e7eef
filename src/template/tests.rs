use super::mapping::{FieldKind, table_fields};
use super::*;
use crate::error::ExtractError;
use crate::model::CatalogSeries;
use crate::sr::{
    CodedConcept, ContentItem, ContentValue, DocumentHeader, Measurement, RelationshipType,
    Report, SrDocument,
};

const STUDY: &str = "1.2.840.1";
const SERIES: &str = "1.2.840.1.7";

fn concept(code: &str) -> Option<CodedConcept> {
    Some(CodedConcept::new(code, "99SMS", code))
}

fn container(code: &str, children: Vec<ContentItem>) -> ContentItem {
    ContentItem {
        relationship: Some(RelationshipType::Contains),
        concept_name: concept(code),
        value: ContentValue::Container(children),
    }
}

fn num(code: &str, value: f64, unit: &str) -> ContentItem {
    ContentItem {
        relationship: Some(RelationshipType::Contains),
        concept_name: concept(code),
        value: ContentValue::Num(Some(Measurement {
            value,
            unit: CodedConcept::new(unit, "UCUM", unit),
        })),
    }
}

fn coded(code: &str, value_code: &str, meaning: &str) -> ContentItem {
    ContentItem {
        relationship: Some(RelationshipType::HasProperties),
        concept_name: concept(code),
        value: ContentValue::Code(CodedConcept::new(value_code, "99SMS", meaning)),
    }
}

fn text(code: &str, value: &str) -> ContentItem {
    ContentItem {
        relationship: Some(RelationshipType::HasObsContext),
        concept_name: concept(code),
        value: ContentValue::Text(value.to_string()),
    }
}

fn header() -> DocumentHeader {
    DocumentHeader {
        patient_id: Some("MRN001".to_string()),
        accession_number: Some("ACC42".to_string()),
        study_instance_uid: Some(STUDY.to_string()),
        series_instance_uid: Some(SERIES.to_string()),
        sop_instance_uid: None,
        patient_sex: Some("M".to_string()),
        study_date: Some("20240131".to_string()),
    }
}

fn document(children: Vec<ContentItem>) -> SrDocument {
    document_with_header(header(), children)
}

fn document_with_header(header: DocumentHeader, children: Vec<ContentItem>) -> SrDocument {
    SrDocument {
        source_name: "report.dcm".to_string(),
        header,
        root: ContentItem {
            relationship: None,
            concept_name: concept("126000"),
            value: ContentValue::Container(children),
        },
    }
}

fn report(documents: Vec<SrDocument>) -> Report {
    Report {
        documents,
        source_digest: Some("digest".to_string()),
    }
}

fn catalog_series() -> CatalogSeries {
    CatalogSeries {
        study_instance_uid: STUDY.to_string(),
        series_instance_uid: SERIES.to_string(),
        description: None,
    }
}

fn measurement_of(row: &FindingRow, field: &str) -> (f64, String) {
    match row.field(field) {
        Some(FieldValue::Measurement { value, unit }) => (*value, unit.clone()),
        other => panic!("expected measurement for {field}, got {other:?}"),
    }
}

fn text_of<'a>(row: &'a FindingRow, field: &str) -> &'a str {
    match row.field(field) {
        Some(FieldValue::Text(value)) => value.as_str(),
        other => panic!("expected text for {field}, got {other:?}"),
    }
}

#[test]
fn two_documents_fill_their_own_tables_only() {
    let calcium = document(vec![container(
        "CHESTCT0304",
        vec![num("CHESTCT0302", 120.0, "mm3")],
    )]);
    let emphysema = document(vec![container(
        "CHESTCT0203",
        vec![coded("RID4799", "RID5671", "mild")],
    )]);

    let record = normalize(&report(vec![calcium, emphysema]), &catalog_series())
        .expect("report should normalize");

    let cardio: Vec<_> = record.rows_in(FindingTable::Cardio).collect();
    assert_eq!(cardio.len(), 1);
    assert_eq!(
        measurement_of(cardio[0], "calcification_volume"),
        (120.0, "mm3".to_string())
    );

    let lung: Vec<_> = record.rows_in(FindingTable::Lung).collect();
    assert_eq!(lung.len(), 1);
    assert_eq!(text_of(lung[0], "emphysema"), "mild");

    for table in [FindingTable::Aorta, FindingTable::Spine, FindingTable::Lesions] {
        assert_eq!(record.rows_in(table).count(), 0, "{} should be empty", table.name());
    }
    assert_eq!(record.categories, vec!["coronary_calcium", "lung_parenchyma"]);
    assert_eq!(record.source_digest.as_deref(), Some("digest"));
}

#[test]
fn sibling_containers_with_one_concept_become_ordinal_rows() {
    let regions = (1..=3)
        .map(|index| {
            container(
                "CHESTCT0304",
                vec![
                    coded("363698007", &format!("RID{index}"), &format!("artery {index}")),
                    num("CHESTCT0302", f64::from(index) * 10.0, "mm3"),
                ],
            )
        })
        .collect();
    let doc = document(vec![container("126010", regions)]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let rows: Vec<_> = record.rows_in(FindingTable::Cardio).collect();

    assert_eq!(rows.len(), 3);
    let ordinals: Vec<u32> = rows.iter().map(|row| row.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);
    assert_eq!(text_of(rows[1], "site"), "artery 2");
    assert_eq!(measurement_of(rows[2], "calcification_volume").0, 30.0);
}

#[test]
fn ordinals_continue_across_documents_of_one_report() {
    let first = document(vec![container("CHESTCT0611", vec![num("CHESTCT0606", -850.0, "[hnsf'U]")])]);
    let second = document(vec![container("CHESTCT0203", vec![coded("RID4799", "RID5672", "moderate")])]);

    let record =
        normalize(&report(vec![first, second]), &catalog_series()).expect("report should normalize");
    let lung: Vec<_> = record.rows_in(FindingTable::Lung).collect();

    assert_eq!(lung.len(), 2);
    assert_eq!((lung[0].ordinal, lung[0].category), (0, "pulmonary_densities"));
    assert_eq!((lung[1].ordinal, lung[1].category), (1, "lung_parenchyma"));
}

#[test]
fn document_category_code_claims_generic_measurement_groups() {
    let aorta_group = |site: &str, diameter: f64| {
        container(
            "125007",
            vec![
                coded("363698007", site, "site"),
                num("RID13432", diameter, "mm"),
            ],
        )
    };
    let doc = document(vec![
        coded("121058", "CHESTCT0410", "Aortic diameters"),
        container(
            "126010",
            vec![
                aorta_group("CHESTCT0408", 38.0),
                aorta_group("C33557", 35.0),
                aorta_group("RID480", 40.0),
                aorta_group("RID9999", 29.0),
            ],
        ),
    ]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let aorta: Vec<_> = record.rows_in(FindingTable::Aorta).collect();

    assert_eq!(aorta.len(), 3);
    assert_eq!(text_of(aorta[0], "site"), "max_ascending");
    assert_eq!(text_of(aorta[1], "site"), "sinus_of_valsalva");
    assert_eq!(text_of(aorta[2], "site"), "RID9999, site");
    assert_eq!(aorta[2].ordinal, 2);
    assert_eq!(record.categories, vec!["aortic_diameters"]);
}

#[test]
fn measurement_group_without_document_category_is_ignored() {
    let doc = document(vec![container(
        "125007",
        vec![num("CHESTCT0302", 5.0, "mm3")],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert!(record.findings.is_empty());
    assert!(record.categories.is_empty());
}

#[test]
fn aorta_group_missing_diameter_yields_no_row() {
    let doc = document(vec![container(
        "CHESTCT0410",
        vec![coded("363698007", "CHESTCT0401", "mid ascending")],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert_eq!(record.rows_in(FindingTable::Aorta).count(), 0);
    assert_eq!(record.categories, vec!["aortic_diameters"]);
}

#[test]
fn aorta_diameter_in_centimeters_is_normalized() {
    let doc = document(vec![container(
        "CHESTCT0410",
        vec![
            coded("363698007", "CHESTCT0403", "mid arch"),
            num("RID13432", 3.1, "cm"),
        ],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let row = record.rows_in(FindingTable::Aorta).next().expect("aorta row");
    let (value, unit) = measurement_of(row, "diameter");
    assert!((value - 31.0).abs() < 1e-9);
    assert_eq!(unit, "mm");
    assert_eq!(text_of(row, "site"), "mid_arch");
}

#[test]
fn measurement_values_and_units_pass_through_unchanged() {
    let doc = document(vec![container(
        "CHESTCT0999",
        vec![
            text("112039", "L1"),
            coded("363698007", "RID1303", "Right upper lobe"),
            num("CHESTCT0902", 7.25, "mm"),
            num("118565006", 143.5, "mm3"),
        ],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let row = record.rows_in(FindingTable::Lesions).next().expect("lesion row");

    assert_eq!(text_of(row, "lesion_id"), "L1");
    assert_eq!(text_of(row, "location"), "Right upper lobe");
    assert_eq!(measurement_of(row, "max_2d_diameter"), (7.25, "mm".to_string()));
    assert_eq!(measurement_of(row, "volume"), (143.5, "mm3".to_string()));
}

#[test]
fn unmapped_concepts_are_ignored() {
    let doc = document(vec![
        container("CHESTCT9999", vec![num("CHESTCT0302", 1.0, "mm3")]),
        container(
            "CHESTCT0304",
            vec![num("NEW-CODE", 3.0, "mm3"), num("CHESTCT0301", 612.0, "cm3")],
        ),
    ]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert_eq!(record.findings.len(), 1);
    let row = &record.findings[0];
    assert_eq!(row.fields.len(), 1);
    assert_eq!(measurement_of(row, "heart_volume"), (612.0, "cm3".to_string()));
}

#[test]
fn nested_groups_inherit_the_fields_of_their_parent() {
    let vertebra = |code: &str, meaning: &str, length: f64| {
        container(
            "125007",
            vec![
                coded("363698007", code, meaning),
                coded("106233006", "RID5825", "anterior"),
                num("121206", length, "mm"),
            ],
        )
    };
    let doc = document(vec![container(
        "CHESTCT0502",
        vec![
            text("CHESTCT0501", "reviewed"),
            vertebra("RID1541", "T7 vertebra", 21.5),
            vertebra("RID1542", "T8 vertebra", 22.0),
        ],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let spine: Vec<_> = record.rows_in(FindingTable::Spine).collect();

    assert_eq!(spine.len(), 2);
    assert_eq!(spine[0].ordinal, 0);
    assert_eq!(text_of(spine[0], "vertebra"), "T7 vertebra");
    assert_eq!(text_of(spine[1], "vertebra"), "T8 vertebra");
    for row in &spine {
        assert_eq!(text_of(row, "status"), "reviewed");
        assert_eq!(text_of(row, "direction"), "anterior");
    }
    assert_eq!(measurement_of(spine[1], "length"), (22.0, "mm".to_string()));
}

#[test]
fn nested_group_value_overrides_parent_context() {
    let doc = document(vec![container(
        "CHESTCT0502",
        vec![
            text("CHESTCT0501", "reviewed"),
            container(
                "125007",
                vec![
                    coded("363698007", "RID1541", "T7 vertebra"),
                    text("CHESTCT0501", "rejected"),
                ],
            ),
        ],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let spine: Vec<_> = record.rows_in(FindingTable::Spine).collect();

    assert_eq!(spine.len(), 1);
    assert_eq!(text_of(spine[0], "status"), "rejected");
}

#[test]
fn image_measurement_children_are_findings_of_the_document_category() {
    let site = |code: &str, diameter: f64| {
        container(
            "CHESTCT0411",
            vec![
                coded("363698007", code, "site"),
                num("RID13432", diameter, "mm"),
            ],
        )
    };
    let doc = document(vec![
        coded("121058", "CHESTCT0410", "Aortic diameters"),
        container(
            "126010",
            vec![site("CHESTCT0408", 38.0), site("CHESTCT0409", 27.5)],
        ),
    ]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    let aorta: Vec<_> = record.rows_in(FindingTable::Aorta).collect();

    assert_eq!(aorta.len(), 2);
    assert_eq!(text_of(aorta[0], "site"), "max_ascending");
    assert_eq!(text_of(aorta[1], "site"), "max_descending");
    assert_eq!(measurement_of(aorta[1], "diameter"), (27.5, "mm".to_string()));
    assert_eq!((aorta[0].ordinal, aorta[1].ordinal), (0, 1));
}

#[test]
fn image_measurement_children_inside_a_category_container_split_into_rows() {
    let site = |code: &str, diameter: f64| {
        container(
            "CHESTCT0411",
            vec![
                coded("363698007", code, "site"),
                num("RID13432", diameter, "mm"),
            ],
        )
    };
    let doc = document(vec![container(
        "CHESTCT0410",
        vec![container(
            "126010",
            vec![site("CHESTCT0408", 38.0), site("CHESTCT0409", 27.5)],
        )],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert_eq!(record.rows_in(FindingTable::Aorta).count(), 2);
}

#[test]
fn image_measurement_children_without_category_are_ignored() {
    let doc = document(vec![container(
        "126010",
        vec![container("CHESTCT0411", vec![num("RID13432", 38.0, "mm")])],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert!(record.findings.is_empty());
}

#[test]
fn conflicting_values_in_one_group_keep_the_last() {
    let doc = document(vec![container(
        "CHESTCT0304",
        vec![num("CHESTCT0302", 10.0, "mm3"), num("CHESTCT0302", 12.0, "mm3")],
    )]);

    let record = normalize(&report(vec![doc]), &catalog_series()).expect("report should normalize");
    assert_eq!(
        measurement_of(&record.findings[0], "calcification_volume"),
        (12.0, "mm3".to_string())
    );
}

#[test]
fn identity_is_resolved_from_headers() {
    let record = normalize(&report(vec![document(vec![])]), &catalog_series())
        .expect("report should normalize");

    assert_eq!(record.identity.study_instance_uid, STUDY);
    assert_eq!(record.identity.series_instance_uid, SERIES);
    assert_eq!(record.identity.patient_id.as_deref(), Some("MRN001"));
    assert_eq!(record.identity.study_date.as_deref(), Some("2024-01-31"));
    assert!(record.findings.is_empty());
}

#[test]
fn demographic_disagreement_keeps_last_document() {
    let mut later = header();
    later.patient_sex = Some("F".to_string());
    later.accession_number = None;

    let record = normalize(
        &report(vec![document(vec![]), document_with_header(later, vec![])]),
        &catalog_series(),
    )
    .expect("report should normalize");

    assert_eq!(record.identity.patient_sex.as_deref(), Some("F"));
    assert_eq!(record.identity.accession_number.as_deref(), Some("ACC42"));
}

#[test]
fn missing_series_uid_is_identity_error() {
    let mut bare = header();
    bare.series_instance_uid = None;

    let err = normalize(&report(vec![document_with_header(bare, vec![])]), &catalog_series())
        .expect_err("identity must fail");
    assert!(matches!(err, ExtractError::IdentityResolution { .. }));
    assert!(err.to_string().contains("SeriesInstanceUID"));
}

#[test]
fn series_uid_mismatch_between_documents_is_identity_error() {
    let mut other = header();
    other.series_instance_uid = Some("1.2.840.1.8".to_string());

    let err = normalize(
        &report(vec![document(vec![]), document_with_header(other, vec![])]),
        &catalog_series(),
    )
    .expect_err("identity must fail");
    assert_eq!(err.kind(), "identity_resolution");
}

#[test]
fn series_uid_must_match_catalog() {
    let mut expected = catalog_series();
    expected.series_instance_uid = "9.9.9".to_string();

    let err = normalize(&report(vec![document(vec![])]), &expected).expect_err("identity must fail");
    assert!(matches!(err, ExtractError::IdentityResolution { .. }));
}

#[test]
fn empty_report_is_identity_error() {
    let err = normalize(&report(vec![]), &catalog_series()).expect_err("identity must fail");
    assert!(matches!(err, ExtractError::IdentityResolution { .. }));
}

#[test]
fn unparseable_study_date_is_kept_verbatim() {
    let mut odd = header();
    odd.study_date = Some("2024".to_string());

    let record = normalize(&report(vec![document_with_header(odd, vec![])]), &catalog_series())
        .expect("report should normalize");
    assert_eq!(record.identity.study_date.as_deref(), Some("2024"));
}

#[test]
fn table_fields_follow_rule_order_without_duplicates() {
    let fields = table_fields(FindingTable::Aorta);
    assert_eq!(
        fields,
        vec![("site", FieldKind::Text), ("diameter", FieldKind::Measurement)]
    );

    let lung = table_fields(FindingTable::Lung);
    assert_eq!(lung[0], ("location", FieldKind::Text));
    assert_eq!(lung.iter().filter(|(name, _)| *name == "volume").count(), 1);
}
