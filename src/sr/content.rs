use serde::Serialize;

/// A coded entry: code value, its coding scheme and human-readable meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodedConcept {
    pub code_value: String,
    pub coding_scheme: String,
    pub code_meaning: String,
}

impl CodedConcept {
    pub fn new(code_value: &str, coding_scheme: &str, code_meaning: &str) -> Self {
        Self {
            code_value: code_value.to_string(),
            coding_scheme: coding_scheme.to_string(),
            code_meaning: code_meaning.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub value: f64,
    pub unit: CodedConcept,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelationshipType {
    Contains,
    HasProperties,
    HasObsContext,
    HasConceptMod,
    HasAcqContext,
    InferredFrom,
    SelectedFrom,
    Other(String),
}

impl RelationshipType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CONTAINS" => Self::Contains,
            "HAS PROPERTIES" => Self::HasProperties,
            "HAS OBS CONTEXT" => Self::HasObsContext,
            "HAS CONCEPT MOD" => Self::HasConceptMod,
            "HAS ACQ CONTEXT" => Self::HasAcqContext,
            "INFERRED FROM" => Self::InferredFrom,
            "SELECTED FROM" => Self::SelectedFrom,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Value of a content item, one variant per SR value type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ContentValue {
    Container(Vec<ContentItem>),
    Text(String),
    /// `None` when the item carries no MeasuredValueSequence.
    Num(Option<Measurement>),
    Code(CodedConcept),
    UidRef(String),
    DateTime(String),
    Date(String),
    Time(String),
    PName(String),
    /// IMAGE, COMPOSITE and WAVEFORM references; the target is never loaded.
    Reference {
        value_type: String,
        sop_instance_uid: Option<String>,
    },
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentItem {
    /// `None` for the document root.
    pub relationship: Option<RelationshipType>,
    pub concept_name: Option<CodedConcept>,
    pub value: ContentValue,
}

impl ContentItem {
    pub fn value_type(&self) -> &str {
        match &self.value {
            ContentValue::Container(_) => "CONTAINER",
            ContentValue::Text(_) => "TEXT",
            ContentValue::Num(_) => "NUM",
            ContentValue::Code(_) => "CODE",
            ContentValue::UidRef(_) => "UIDREF",
            ContentValue::DateTime(_) => "DATETIME",
            ContentValue::Date(_) => "DATE",
            ContentValue::Time(_) => "TIME",
            ContentValue::PName(_) => "PNAME",
            ContentValue::Reference { value_type, .. } => value_type,
            ContentValue::Unsupported(value_type) => value_type,
        }
    }

    pub fn concept_code(&self) -> Option<&str> {
        self.concept_name
            .as_ref()
            .map(|concept| concept.code_value.as_str())
    }

    pub fn is_container(&self) -> bool {
        matches!(self.value, ContentValue::Container(_))
    }

    pub fn children(&self) -> &[ContentItem] {
        match &self.value {
            ContentValue::Container(children) => children,
            _ => &[],
        }
    }

    /// String form of leaf values that can populate a text column.
    pub fn text_value(&self) -> Option<&str> {
        match &self.value {
            ContentValue::Text(value)
            | ContentValue::UidRef(value)
            | ContentValue::DateTime(value)
            | ContentValue::Date(value)
            | ContentValue::Time(value)
            | ContentValue::PName(value) => Some(value),
            ContentValue::Code(code) => Some(&code.code_meaning),
            _ => None,
        }
    }
}

/// Header attributes of one SR instance used for identity resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentHeader {
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
    pub study_instance_uid: Option<String>,
    pub series_instance_uid: Option<String>,
    pub sop_instance_uid: Option<String>,
    pub patient_sex: Option<String>,
    pub study_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SrDocument {
    pub source_name: String,
    pub header: DocumentHeader,
    pub root: ContentItem,
}

/// All SR instances belonging to one series, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Report {
    pub documents: Vec<SrDocument>,
    pub source_digest: Option<String>,
}
