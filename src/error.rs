//! Error types for the excelmap library

use thiserror::Error;

use crate::types::ScalarKind;

/// Result type alias for excelmap operations
pub type Result<T> = std::result::Result<T, ExcelError>;

/// Main error type for all mapping and Excel operations
#[derive(Error, Debug)]
pub enum ExcelError {
    /// Field metadata of a record type is missing, duplicated or unmappable
    #[error("Invalid schema for type '{type_name}': {reason}")]
    Schema { type_name: String, reason: String },

    /// A field value could not be coerced to its declared scalar kind
    #[error("Cannot coerce value '{value}' of field '{field}' to {kind}")]
    ValueCoercion {
        field: String,
        value: String,
        kind: ScalarKind,
    },

    /// A body row could not be built (missing record or failing accessor)
    #[error("Failed to build row {row} of sheet '{sheet}': {reason}")]
    RowBuild {
        sheet: String,
        row: u32,
        reason: String,
    },

    /// Error occurred while writing a row
    #[error("Failed to write row {row} to sheet '{sheet}': {source}")]
    WriteRowError {
        row: u32,
        sheet: String,
        #[source]
        source: Box<ExcelError>,
    },

    /// A sheet build failed; carries the sheet name and its 1-based position
    #[error("Failed to build sheet '{sheet}' (sheet #{sheet_number}): {source}")]
    Sheet {
        sheet: String,
        sheet_number: u32,
        #[source]
        source: Box<ExcelError>,
    },

    /// Operation is not valid in the current builder/session state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error occurred while reading Excel file
    #[error("Failed to read Excel file: {0}")]
    ReadError(String),

    /// Error occurred while writing Excel file
    #[error("Failed to write Excel file: {0}")]
    WriteError(String),

    /// Invalid sheet name or sheet not found
    #[error("Sheet '{sheet}' not found. Available sheets: {available}")]
    SheetNotFound { sheet: String, available: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ExcelError {
    pub(crate) fn schema<S: Into<String>>(type_name: &str, reason: S) -> Self {
        ExcelError::Schema {
            type_name: type_name.to_string(),
            reason: reason.into(),
        }
    }

    /// Innermost error, skipping sheet and row context wrappers
    pub fn root_cause(&self) -> &ExcelError {
        match self {
            ExcelError::Sheet { source, .. } | ExcelError::WriteRowError { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// True for errors raised while building descriptors
    pub fn is_schema_error(&self) -> bool {
        matches!(self.root_cause(), ExcelError::Schema { .. })
    }

    /// True for data-integrity errors raised by the value coercer
    pub fn is_coercion_error(&self) -> bool {
        matches!(self.root_cause(), ExcelError::ValueCoercion { .. })
    }

    /// True for missing records and accessor failures
    pub fn is_row_build_error(&self) -> bool {
        matches!(self.root_cause(), ExcelError::RowBuild { .. })
    }
}
