//! Upload resolution: turn the collaborator's upload into bytes and a format.
//!
//! The upload collaborator either hands over bytes or a request-scoped temp
//! file. A temp file is adopted into the job's [`ArtifactSet`] before anything
//! is validated, so it is removed with the job whether validation passes or
//! not.
//!
//! The format comes from the original filename's extension only. PDFs are
//! additionally sniffed for the `%PDF` header so that a renamed file fails
//! as `CorruptInput` here rather than inside a tool.

use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use crate::staging::ArtifactSet;
use std::path::PathBuf;
use tracing::debug;

/// How far into a PDF the header may appear; some producers prepend junk.
const PDF_HEADER_WINDOW: usize = 1024;

/// Where the upload payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Payload held in memory.
    Bytes(Vec<u8>),
    /// Payload written to a request-scoped temp file; the job takes ownership.
    TempFile(PathBuf),
}

/// A file payload plus the filename the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Original filename; only its extension is used.
    pub filename: String,
    pub source: UploadSource,
}

impl Upload {
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            source: UploadSource::Bytes(bytes),
        }
    }

    pub fn from_temp_file(filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            source: UploadSource::TempFile(path.into()),
        }
    }
}

/// A validated upload, ready for a pipeline.
#[derive(Debug)]
pub struct ResolvedUpload {
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

/// Adopt, classify, read and sniff `upload`.
///
/// `accepted` is the set of formats the endpoint takes; anything else is
/// `UnsupportedFormat`.
pub fn resolve(
    upload: Upload,
    accepted: &[DocumentFormat],
    artifacts: &mut ArtifactSet,
) -> Result<ResolvedUpload, ShrinkError> {
    let Upload { filename, source } = upload;
    if let UploadSource::TempFile(path) = &source {
        artifacts.adopt(Stage::Intake, path.clone())?;
    }

    let format = DocumentFormat::from_filename(&filename)?;
    if !accepted.contains(&format) {
        return Err(ShrinkError::UnsupportedFormat {
            extension: format.extension().to_string(),
        });
    }

    let bytes = match source {
        UploadSource::Bytes(bytes) => bytes,
        UploadSource::TempFile(path) => {
            std::fs::read(&path).map_err(|e| ShrinkError::io(Stage::Intake, &path, e))?
        }
    };
    check_payload(format, &bytes)?;

    debug!(
        "Job {}: accepted {} upload of {} bytes",
        artifacts.job_id(),
        format,
        bytes.len()
    );
    Ok(ResolvedUpload { format, bytes })
}

/// Cheap structural checks before a pipeline spends time on the payload.
pub fn check_payload(format: DocumentFormat, bytes: &[u8]) -> Result<(), ShrinkError> {
    if bytes.is_empty() {
        return Err(ShrinkError::CorruptInput {
            stage: Stage::Validate,
            detail: "upload is empty".into(),
        });
    }
    if format == DocumentFormat::Pdf && !has_pdf_header(bytes) {
        let magic: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(ShrinkError::CorruptInput {
            stage: Stage::Validate,
            detail: format!("missing %PDF header (starts with {:?})", magic),
        });
    }
    Ok(())
}

fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(PDF_HEADER_WINDOW)];
    window.windows(4).any(|w| w == b"%PDF")
}
