//! Error types for the edgequake-shrink library.
//!
//! A single fatal error type, [`ShrinkError`], is returned by every pipeline.
//! Two small companions make it usable at the request boundary:
//!
//! * [`ErrorKind`]: the stable taxonomy the Job Façade maps to an HTTP-style
//!   status and a plain-text reason. Variants of `ShrinkError` carry detail
//!   (tool names, exit codes, stderr) that must never reach the caller;
//!   `ErrorKind` carries none.
//!
//! * [`Stage`]: where in the pipeline the failure happened, so a log line
//!   alone is enough to diagnose a job whose staged files are already gone.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-shrink library.
#[derive(Debug, Error)]
pub enum ShrinkError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The request carried no file payload.
    #[error("No file uploaded")]
    MissingUpload,

    /// The filename extension is not one the endpoint accepts.
    #[error("Unsupported file format: '{extension}'")]
    UnsupportedFormat { extension: String },

    /// The payload could not be decoded or parsed.
    #[error("Corrupt input during {stage}: {detail}")]
    CorruptInput { stage: Stage, detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The image encoder rejected the decoded image.
    #[error("Image encoding failed at quality {quality}: {detail}")]
    CompressionFailed { quality: u8, detail: String },

    // ── External tool errors ──────────────────────────────────────────────
    /// The tool binary is missing or could not be executed.
    #[error("Failed to launch '{tool}' during {stage}: {source}")]
    ToolLaunchFailed {
        stage: Stage,
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool ran but exited non-zero (or was killed by a signal).
    #[error("'{tool}' failed during {stage} with {}: {stderr}", describe_status(.status))]
    ToolFailed {
        stage: Stage,
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    /// The tool exited zero but its output artifact is missing or unusable.
    #[error("'{tool}' produced no usable output during {stage}: {detail}")]
    InvalidStageOutput {
        stage: Stage,
        tool: String,
        detail: String,
    },

    // ── Size errors ───────────────────────────────────────────────────────
    /// The produced output is larger than the configured ceiling.
    #[error("Output of {size} bytes exceeds the {limit}-byte ceiling")]
    SizeLimitExceeded {
        stage: Stage,
        format: crate::format::DocumentFormat,
        size: u64,
        limit: u64,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a staged artifact failed.
    #[error("I/O error during {stage} on '{path}': {source}")]
    Io {
        stage: Stage,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The in-process document model could not be rewritten or serialised.
    #[error("PDF document model error during {stage}: {detail}")]
    DocumentModel { stage: Stage, detail: String },

    /// The staging working directory is missing or unusable.
    #[error("Staging directory '{path}' is not usable: {reason}")]
    StagingUnavailable { path: PathBuf, reason: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, sealed job, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ShrinkError {
    /// Classify this error for the response boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShrinkError::MissingUpload => ErrorKind::MissingUpload,
            ShrinkError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ShrinkError::CorruptInput { .. } => ErrorKind::CorruptInput,
            ShrinkError::CompressionFailed { .. } => ErrorKind::CompressionFailed,
            ShrinkError::ToolLaunchFailed { .. } => ErrorKind::ToolLaunchFailed,
            ShrinkError::ToolFailed { stage, .. } | ShrinkError::InvalidStageOutput { stage, .. } => {
                if *stage == Stage::Preprocess {
                    ErrorKind::PreprocessFailed
                } else {
                    ErrorKind::RenderFailed
                }
            }
            ShrinkError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            ShrinkError::Io { .. }
            | ShrinkError::DocumentModel { .. }
            | ShrinkError::StagingUnavailable { .. }
            | ShrinkError::InvalidConfig(_)
            | ShrinkError::Internal(_) => ErrorKind::InternalIO,
        }
    }

    /// The pipeline stage the error was raised in.
    pub fn stage(&self) -> Stage {
        match self {
            ShrinkError::MissingUpload | ShrinkError::UnsupportedFormat { .. } => Stage::Validate,
            ShrinkError::CorruptInput { stage, .. }
            | ShrinkError::ToolLaunchFailed { stage, .. }
            | ShrinkError::ToolFailed { stage, .. }
            | ShrinkError::InvalidStageOutput { stage, .. }
            | ShrinkError::SizeLimitExceeded { stage, .. }
            | ShrinkError::Io { stage, .. }
            | ShrinkError::DocumentModel { stage, .. } => *stage,
            ShrinkError::CompressionFailed { .. } => Stage::Encode,
            ShrinkError::StagingUnavailable { .. } => Stage::Intake,
            ShrinkError::InvalidConfig(_) | ShrinkError::Internal(_) => Stage::Internal,
        }
    }

    pub(crate) fn io(stage: Stage, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ShrinkError::Io {
            stage,
            path: path.into(),
            source,
        }
    }
}

/// Caller-facing failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MissingUpload,
    UnsupportedFormat,
    CorruptInput,
    CompressionFailed,
    PreprocessFailed,
    RenderFailed,
    ToolLaunchFailed,
    SizeLimitExceeded,
    InternalIO,
}

impl ErrorKind {
    /// HTTP-style status class: validation and size rejections are client
    /// errors, everything the server should have handled is a 500.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::MissingUpload
            | ErrorKind::UnsupportedFormat
            | ErrorKind::CorruptInput
            | ErrorKind::SizeLimitExceeded => 400,
            ErrorKind::CompressionFailed
            | ErrorKind::PreprocessFailed
            | ErrorKind::RenderFailed
            | ErrorKind::ToolLaunchFailed
            | ErrorKind::InternalIO => 500,
        }
    }

    pub fn is_client_error(self) -> bool {
        self.status_code() < 500
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MissingUpload => "MissingUpload",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::CorruptInput => "CorruptInput",
            ErrorKind::CompressionFailed => "CompressionFailed",
            ErrorKind::PreprocessFailed => "PreprocessFailed",
            ErrorKind::RenderFailed => "RenderFailed",
            ErrorKind::ToolLaunchFailed => "ToolLaunchFailed",
            ErrorKind::SizeLimitExceeded => "SizeLimitExceeded",
            ErrorKind::InternalIO => "InternalIO",
        };
        f.write_str(name)
    }
}

/// Pipeline stage labels, shared by both pipelines, logs, and staged file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Request validation (upload present, extension accepted, magic bytes).
    Validate,
    /// Moving the collaborator's upload into the staging directory.
    Intake,
    /// Image decode.
    Decode,
    /// Image encode at a given quality.
    Encode,
    /// `PdfStrategy::External`: copy the input into a fresh staged path.
    Normalize,
    /// `PdfStrategy::External`: structural normalisation (qpdf).
    Preprocess,
    /// `PdfStrategy::External`: raster-quality re-encode (Ghostscript).
    Render,
    /// `PdfStrategy::Library`: parse the document model.
    Load,
    /// `PdfStrategy::Library`: grayscale conversion.
    Recolor,
    /// `PdfStrategy::Library`: serialise the document model.
    Save,
    /// Output ceiling enforcement.
    SizeCheck,
    /// Handing the result to the caller.
    Deliver,
    /// Not attributable to a pipeline stage.
    Internal,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Intake => "intake",
            Stage::Decode => "decode",
            Stage::Encode => "encode",
            Stage::Normalize => "normalize",
            Stage::Preprocess => "preprocess",
            Stage::Render => "render",
            Stage::Load => "load",
            Stage::Recolor => "recolor",
            Stage::Save => "save",
            Stage::SizeCheck => "size_check",
            Stage::Deliver => "deliver",
            Stage::Internal => "internal",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DocumentFormat;

    #[test]
    fn tool_failure_kind_follows_stage() {
        let pre = ShrinkError::ToolFailed {
            stage: Stage::Preprocess,
            tool: "qpdf".into(),
            status: Some(2),
            stderr: "damaged xref".into(),
        };
        let render = ShrinkError::ToolFailed {
            stage: Stage::Render,
            tool: "gs".into(),
            status: None,
            stderr: String::new(),
        };
        assert_eq!(pre.kind(), ErrorKind::PreprocessFailed);
        assert_eq!(render.kind(), ErrorKind::RenderFailed);
        assert!(pre.to_string().contains("exit code 2"), "got: {pre}");
        assert!(render.to_string().contains("signal"), "got: {render}");
    }

    #[test]
    fn launch_failure_is_server_error() {
        let e = ShrinkError::ToolLaunchFailed {
            stage: Stage::Render,
            tool: "gs".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(e.kind(), ErrorKind::ToolLaunchFailed);
        assert_eq!(e.stage(), Stage::Render);
        assert_eq!(e.kind().status_code(), 500);
    }

    #[test]
    fn size_limit_is_client_rejection() {
        let e = ShrinkError::SizeLimitExceeded {
            stage: Stage::SizeCheck,
            format: DocumentFormat::Pdf,
            size: 300,
            limit: 200,
        };
        assert_eq!(e.kind(), ErrorKind::SizeLimitExceeded);
        assert!(e.kind().is_client_error());
        assert!(e.to_string().contains("300"));
    }

    #[test]
    fn kind_serialises_with_wire_names() {
        let json = serde_json::to_string(&ErrorKind::InternalIO).unwrap();
        assert_eq!(json, "\"InternalIO\"");
        assert_eq!(ErrorKind::ToolLaunchFailed.to_string(), "ToolLaunchFailed");
        assert_eq!(Stage::SizeCheck.to_string(), "size_check");
    }
}
