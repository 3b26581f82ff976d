//! Centralized error types for mailpdf.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// All errors produced by the conversion pipeline.
#[derive(Error, Debug)]
pub enum ConvertError {
    /// The input bytes are not a decodable email container.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The message was normalized but the document could not be produced.
    #[error("Render error: {0}")]
    Render(String),

    /// A single attachment could not be appended. Always logged and skipped.
    #[error("Attachment '{filename}' could not be merged: {reason}")]
    AttachmentMerge { filename: String, reason: String },

    /// The external MSG parser failed to start, crashed, or produced garbage.
    #[error("MSG parser subprocess failed: {0}")]
    Subprocess(String),

    /// The external MSG parser exceeded its time budget.
    #[error("MSG parser timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, ConvertError>`.
pub type Result<T> = std::result::Result<T, ConvertError>;

/// Stable, caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    ParseError,
    RenderError,
    AttachmentMergeError,
    SubprocessError,
    TimeoutError,
    IoError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "ParseError",
            Self::RenderError => "RenderError",
            Self::AttachmentMergeError => "AttachmentMergeError",
            Self::SubprocessError => "SubprocessError",
            Self::TimeoutError => "TimeoutError",
            Self::IoError => "IoError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure payload handed back to callers instead of a bare crash.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ConvertError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(detail: impl Into<String>) -> Self {
        Self::Parse(detail.into())
    }

    pub fn render(detail: impl Into<String>) -> Self {
        Self::Render(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_) => ErrorKind::ParseError,
            Self::Render(_) => ErrorKind::RenderError,
            Self::AttachmentMerge { .. } => ErrorKind::AttachmentMergeError,
            Self::Subprocess(_) => ErrorKind::SubprocessError,
            Self::Timeout(_) => ErrorKind::TimeoutError,
            Self::Io { .. } => ErrorKind::IoError,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind(),
            detail: self.to_string(),
        }
    }

    /// Status an HTTP front end should answer with.
    ///
    /// A parse failure is a data-quality problem of the upload, so it maps to
    /// 422 rather than a server fault.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Parse(_) => 422,
            Self::Subprocess(_) => 502,
            Self::Timeout(_) => 504,
            Self::Render(_) | Self::AttachmentMerge { .. } | Self::Io { .. } => 500,
        }
    }

    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<lopdf::Error> for ConvertError {
    fn from(e: lopdf::Error) -> Self {
        Self::Render(format!("PDF structure: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_maps_to_422() {
        let err = ConvertError::parse("truncated MIME");
        assert_eq!(err.http_status(), 422);
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = ConvertError::Timeout(Duration::from_secs(3));
        assert_eq!(err.http_status(), 504);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_payload_serializes_kind_and_detail() {
        let payload = ConvertError::render("no font").payload();
        let json = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(json["kind"], "RenderError");
        assert_eq!(json["detail"], "Render error: no font");
    }
}
