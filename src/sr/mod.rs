//! Structured Report content trees.
//!
//! The walker decodes the ContentSequence of an SR dataset into a tree of
//! [`ContentItem`]s, one enum variant per value type. Children keep document
//! order: sibling findings that share a concept code are told apart only by
//! their position.

use std::path::PathBuf;

use crate::error::ExtractError;

mod content;
mod walker;

pub use content::{
    CodedConcept, ContentItem, ContentValue, DocumentHeader, Measurement, RelationshipType,
    Report, SrDocument,
};
pub use walker::load_report;

/// Turns the files of one series into a parsed [`Report`].
pub trait DocumentReader {
    fn read(&self, paths: &[PathBuf]) -> Result<Report, ExtractError>;
}

/// Reads SR instances from disk with the `dicom` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DicomFileReader;

impl DocumentReader for DicomFileReader {
    fn read(&self, paths: &[PathBuf]) -> Result<Report, ExtractError> {
        load_report(paths)
    }
}
