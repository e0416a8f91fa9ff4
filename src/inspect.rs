//! Sanity inspection of produced PDF bytes. Integration tests use this to
//! check the page-count law against a real parser instead of token
//! counting.

use lopdf::Document as LoDocument;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectErrorCode {
    ParseFailed,
    IoError,
}

impl InspectErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InspectErrorCode::ParseFailed => "PDF_PARSE_FAILED",
            InspectErrorCode::IoError => "PDF_IO_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectError {
    pub code: InspectErrorCode,
    pub message: String,
}

impl std::fmt::Display for InspectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for InspectError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectReport {
    pub pdf_version: String,
    pub page_count: usize,
    pub encrypted: bool,
    pub file_size_bytes: usize,
}

pub fn inspect_pdf_bytes(bytes: &[u8]) -> Result<InspectReport, InspectError> {
    let pdf = LoDocument::load_mem(bytes).map_err(|err| InspectError {
        code: InspectErrorCode::ParseFailed,
        message: err.to_string(),
    })?;

    Ok(InspectReport {
        pdf_version: pdf.version.clone(),
        page_count: pdf.get_pages().len(),
        encrypted: pdf.is_encrypted(),
        file_size_bytes: bytes.len(),
    })
}

pub fn inspect_pdf_path(path: &Path) -> Result<InspectReport, InspectError> {
    let data = std::fs::read(path).map_err(|err| InspectError {
        code: InspectErrorCode::IoError,
        message: err.to_string(),
    })?;
    inspect_pdf_bytes(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bytes_report_a_parse_failure() {
        let err = inspect_pdf_bytes(b"not a pdf").expect_err("invalid");
        assert_eq!(err.code, InspectErrorCode::ParseFailed);
        assert_eq!(err.code.as_str(), "PDF_PARSE_FAILED");
    }

    #[test]
    fn missing_files_report_an_io_error() {
        let missing = std::env::temp_dir().join(format!(
            "shotpress_inspect_missing_{}.pdf",
            std::process::id()
        ));
        let err = inspect_pdf_path(&missing).expect_err("missing");
        assert_eq!(err.code, InspectErrorCode::IoError);
    }
}
