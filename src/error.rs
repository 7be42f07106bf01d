//! Error taxonomy for the report pipeline
//!
//! Each external stage has its own error type so callers can tell which
//! stage failed. `PipelineError` wraps them for the orchestration layer.

use serde::Serialize;
use thiserror::Error;

/// Failure while turning PDF bytes into an `Extraction`.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("extraction service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("extraction quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("unsupported PDF: {0}")]
    UnsupportedPdf(String),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),

    #[error("malformed extraction result: {0}")]
    MalformedResult(String),

    #[error("extraction backend not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// The structuring output could not be read as a `ReportSchema`.
#[derive(Error, Debug)]
pub enum SchemaMismatchError {
    #[error("response is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("{} field(s) failed validation: {}", .0.len(), summarize(.0))]
    Invalid(Vec<ValidationError>),
}

/// Failure from the LLM structuring service.
#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("structuring service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("structuring request timed out")]
    Timeout,

    #[error("structuring service not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),
}

impl StructuringError {
    /// Whether a caller may retry the same input. Structuring is a pure
    /// function of its input, so transient service failures are retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StructuringError::Service { status, .. } => *status == 429 || *status >= 500,
            StructuringError::Timeout | StructuringError::Http(_) => true,
            StructuringError::NotConfigured(_) | StructuringError::SchemaMismatch(_) => false,
        }
    }
}

impl From<reqwest::Error> for StructuringError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StructuringError::Timeout
        } else {
            StructuringError::Http(e)
        }
    }
}

/// The template is not a readable Word document.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("template format error in {part}: {message}")]
pub struct TemplateFormatError {
    pub part: String,
    pub message: String,
}

impl TemplateFormatError {
    pub fn new(part: impl Into<String>, message: impl Into<String>) -> Self {
        Self { part: part.into(), message: message.into() }
    }
}

impl From<zip::result::ZipError> for TemplateFormatError {
    fn from(e: zip::result::ZipError) -> Self {
        TemplateFormatError::new("archive", e.to_string())
    }
}

/// Field-level problem found while validating structuring output.
/// Collected and reported, never raised on its own.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{path}: {message}")]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

fn summarize(errors: &[ValidationError]) -> String {
    errors.iter().take(5).map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
}

/// Pipeline stage, reported to clients alongside the failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Extraction,
    Structuring,
    Validation,
    Filling,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Extraction => "extraction",
            Stage::Structuring => "structuring",
            Stage::Validation => "validation",
            Stage::Filling => "filling",
        }
    }
}

/// End-to-end failure of a `generate` call. No partial output accompanies it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    #[error("PDF extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("structuring failed: {0}")]
    Structuring(StructuringError),

    #[error("structured data does not match the schema: {0}")]
    SchemaMismatch(SchemaMismatchError),

    #[error("template fill failed: {0}")]
    Template(#[from] TemplateFormatError),
}

impl From<StructuringError> for PipelineError {
    fn from(e: StructuringError) -> Self {
        match e {
            StructuringError::SchemaMismatch(m) => PipelineError::SchemaMismatch(m),
            other => PipelineError::Structuring(other),
        }
    }
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidUpload(_) => Stage::Upload,
            PipelineError::Extraction(_) => Stage::Extraction,
            PipelineError::Structuring(_) => Stage::Structuring,
            PipelineError::SchemaMismatch(_) => Stage::Validation,
            PipelineError::Template(_) => Stage::Filling,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_maps_to_validation_stage() {
        let err: PipelineError = StructuringError::SchemaMismatch(
            SchemaMismatchError::MalformedJson("eof".into()),
        )
        .into();
        assert_eq!(err.stage(), Stage::Validation);
    }

    #[test]
    fn test_service_errors_are_retryable_by_status() {
        let busy = StructuringError::Service { status: 429, body: String::new() };
        let bad = StructuringError::Service { status: 400, body: String::new() };
        assert!(busy.is_retryable());
        assert!(!bad.is_retryable());
        assert!(!StructuringError::SchemaMismatch(SchemaMismatchError::Invalid(vec![])).is_retryable());
    }

    #[test]
    fn test_invalid_message_lists_fields() {
        let err = SchemaMismatchError::Invalid(vec![
            ValidationError::new("basic_info.cb_report_no", "expected text, found object"),
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("1 field(s)"));
        assert!(msg.contains("basic_info.cb_report_no"));
    }
}
