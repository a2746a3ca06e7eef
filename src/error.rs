use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while turning one catalog series into stored rows.
///
/// Everything except `StoreConnectivity` is scoped to a single series: the
/// batch driver logs it, counts it and moves on to the next series.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("malformed SR document {source_name}: {detail}")]
    MalformedDocument { source_name: String, detail: String },

    #[error("cannot resolve identity for series {series_uid}: {detail}")]
    IdentityResolution { series_uid: String, detail: String },

    #[error("series {series_uid} is missing {} expected file(s)", missing.len())]
    MissingFile {
        series_uid: String,
        missing: Vec<PathBuf>,
    },

    #[error("store unreachable: {0}")]
    StoreConnectivity(String),
}

impl ExtractError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedDocument { .. } => "malformed_document",
            Self::IdentityResolution { .. } => "identity_resolution",
            Self::MissingFile { .. } => "missing_file",
            Self::StoreConnectivity(_) => "store_connectivity",
        }
    }

    pub(crate) fn malformed(source_name: &str, detail: impl Into<String>) -> Self {
        Self::MalformedDocument {
            source_name: source_name.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn identity(series_uid: &str, detail: impl Into<String>) -> Self {
        Self::IdentityResolution {
            series_uid: series_uid.to_string(),
            detail: detail.into(),
        }
    }
}
