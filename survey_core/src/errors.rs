//! # Error Types
//!
//! Structured error types for survey_core. Every failure a computation can
//! report is one of these variants, so callers (and anything consuming the
//! JSON form) can tell "bad input" apart from "not enough data yet".
//!
//! Advisory tolerance checks never produce errors. They are reported as
//! flags on the result (see [`crate::calculations::gyro::ToleranceCheck`]).
//!
//! ## Example
//!
//! ```rust
//! use survey_core::errors::{SurveyError, SurveyResult};
//!
//! fn validate_tolerance(max_cm: f64) -> SurveyResult<()> {
//!     if max_cm < 0.0 {
//!         return Err(SurveyError::validation(
//!             "max_discrepancy_cm",
//!             max_cm.to_string(),
//!             "Tolerance cannot be negative",
//!         ));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate_tolerance(-1.0).is_err());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for survey_core operations
pub type SurveyResult<T> = Result<T, SurveyError>;

/// Structured error type for survey computations and storage.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum SurveyError {
    /// A value is out of range at construction (e.g. 75 minutes)
    #[error("Invalid value for '{field}': {value} - {reason}")]
    Validation {
        field: String,
        value: String,
        reason: String,
    },

    /// Angle text could not be parsed
    #[error("Cannot parse '{input}': {reason}")]
    Format { input: String, reason: String },

    /// Too few reference points, or a required axis/reading is absent
    #[error("Insufficient data for {context}: {reason}")]
    InsufficientData { context: String, reason: String },

    /// A pipeline stage was run before the stage it depends on
    #[error("Stage '{stage}' is missing its prerequisite: {missing}")]
    MissingPrerequisite { stage: String, missing: String },

    /// No record with this id in the collection
    #[error("No {collection} with id {id}")]
    NotFound { collection: String, id: u32 },

    /// File I/O error
    #[error("File error: {operation} on '{path}' - {reason}")]
    FileError {
        operation: String,
        path: String,
        reason: String,
    },

    /// File is locked by another user/process
    #[error("File locked: '{path}' is locked by {locked_by} since {locked_at}")]
    FileLocked {
        path: String,
        locked_by: String,
        locked_at: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    /// Schema version mismatch
    #[error("Version mismatch: file version {file_version}, expected {expected_version}")]
    VersionMismatch {
        file_version: String,
        expected_version: String,
    },
}

impl SurveyError {
    /// Create a Validation error
    pub fn validation(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SurveyError::Validation {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a Format error
    pub fn format(input: impl Into<String>, reason: impl Into<String>) -> Self {
        SurveyError::Format {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an InsufficientData error
    pub fn insufficient_data(context: impl Into<String>, reason: impl Into<String>) -> Self {
        SurveyError::InsufficientData {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingPrerequisite error
    pub fn missing_prerequisite(stage: impl Into<String>, missing: impl Into<String>) -> Self {
        SurveyError::MissingPrerequisite {
            stage: stage.into(),
            missing: missing.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(collection: impl Into<String>, id: u32) -> Self {
        SurveyError::NotFound {
            collection: collection.into(),
            id,
        }
    }

    /// Create a FileError
    pub fn file_error(
        operation: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SurveyError::FileError {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a FileLocked error
    pub fn file_locked(
        path: impl Into<String>,
        locked_by: impl Into<String>,
        locked_at: impl Into<String>,
    ) -> Self {
        SurveyError::FileLocked {
            path: path.into(),
            locked_by: locked_by.into(),
            locked_at: locked_at.into(),
        }
    }

    /// Check if this is a recoverable error (e.g., can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SurveyError::FileLocked { .. })
    }

    /// Get a short error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            SurveyError::Validation { .. } => "VALIDATION_ERROR",
            SurveyError::Format { .. } => "FORMAT_ERROR",
            SurveyError::InsufficientData { .. } => "INSUFFICIENT_DATA",
            SurveyError::MissingPrerequisite { .. } => "MISSING_PREREQUISITE",
            SurveyError::NotFound { .. } => "NOT_FOUND",
            SurveyError::FileError { .. } => "FILE_ERROR",
            SurveyError::FileLocked { .. } => "FILE_LOCKED",
            SurveyError::SerializationError { .. } => "SERIALIZATION_ERROR",
            SurveyError::VersionMismatch { .. } => "VERSION_MISMATCH",
        }
    }
}
