//! Job Façade: one request in, one response out.
//!
//! The façade is the only place where a [`ShrinkError`] becomes something a
//! client sees. It logs the full error with its kind, stage and job id, and
//! answers with a status code and a fixed plain-text reason that never
//! contains a path, a tool name or stderr.
//!
//! ```text
//! JobRequest ─▶ intake (adopt, classify, sniff) ─▶ CompressionJob::run ─▶ JobResponse
//!                     └──────────── failure at any point ──────────────▶ JobResponse (4xx/5xx)
//! ```
//!
//! Every staged file is gone when [`JobFacade::handle`] returns, except the
//! delivered output of a successful external-strategy PDF job, which the response owns
//! until [`JobResponse::transmit`] finished or the response is dropped.

use crate::config::CompressionConfig;
use crate::error::{ErrorKind, ShrinkError};
use crate::format::DocumentFormat;
use crate::job::{CompressionJob, JobOptions};
use crate::output::{CompressedDocument, CompressionStats};
use crate::pipeline::input::{self, Upload};
use crate::staging::{ArtifactSet, DeliveredArtifact, Staging};
use std::collections::HashMap;
use std::io::{self, Write};
use tracing::{error, info};
use uuid::Uuid;

const IMAGE_FORMATS: &[DocumentFormat] = &[
    DocumentFormat::Jpeg,
    DocumentFormat::Png,
    DocumentFormat::Webp,
];
const PDF_FORMATS: &[DocumentFormat] = &[DocumentFormat::Pdf];
const ALL_FORMATS: &[DocumentFormat] = &[
    DocumentFormat::Jpeg,
    DocumentFormat::Png,
    DocumentFormat::Webp,
    DocumentFormat::Pdf,
];

/// Content type of every failure body.
pub const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Which formats a request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/compress-image`: jpeg, jpg, png, webp.
    Image,
    /// `/compress-pdf`: pdf.
    Pdf,
    /// Route by extension; used by the CLI.
    Any,
}

impl Endpoint {
    pub fn accepted_formats(self) -> &'static [DocumentFormat] {
        match self {
            Endpoint::Image => IMAGE_FORMATS,
            Endpoint::Pdf => PDF_FORMATS,
            Endpoint::Any => ALL_FORMATS,
        }
    }
}

/// An inbound request: an optional upload plus flat form fields.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    pub upload: Option<Upload>,
    pub fields: HashMap<String, String>,
}

impl JobRequest {
    pub fn new(upload: Upload) -> Self {
        Self {
            upload: Some(upload),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// What the response collaborator sends back.
#[derive(Debug)]
pub struct JobResponse {
    pub status: u16,
    pub content_type: &'static str,
    /// `<job-id>-output.<ext>` on success.
    pub attachment_filename: Option<String>,
    pub body: Vec<u8>,
    /// Set on failure.
    pub error_kind: Option<ErrorKind>,
    pub job_id: Uuid,
    /// Set on success.
    pub stats: Option<CompressionStats>,
    artifact: Option<DeliveredArtifact>,
}

impl JobResponse {
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }

    /// `Content-Disposition` header value for a successful response.
    pub fn content_disposition(&self) -> Option<String> {
        self.attachment_filename
            .as_ref()
            .map(|name| format!("attachment; filename=\"{name}\""))
    }

    /// Whether an on-disk output is still held for this response.
    pub fn holds_artifact(&self) -> bool {
        self.artifact.is_some()
    }

    /// Write the body to `writer`, then release the delivered artifact.
    ///
    /// The artifact is released whether or not the write succeeded.
    pub fn transmit<W: Write>(mut self, writer: &mut W) -> io::Result<()> {
        let written = writer.write_all(&self.body).and_then(|_| writer.flush());
        let released = self.artifact.take().map(DeliveredArtifact::release);
        written?;
        if let Some(released) = released {
            released?;
        }
        Ok(())
    }

    fn success(job_id: Uuid, doc: CompressedDocument) -> Self {
        let attachment_filename = doc.attachment_filename();
        Self {
            status: 200,
            content_type: doc.format.mime_type(),
            attachment_filename: Some(attachment_filename),
            body: doc.bytes,
            error_kind: None,
            job_id,
            stats: Some(doc.stats),
            artifact: doc.artifact,
        }
    }

    fn failure(job_id: Uuid, err: &ShrinkError) -> Self {
        let kind = err.kind();
        Self {
            status: kind.status_code(),
            content_type: ERROR_CONTENT_TYPE,
            attachment_filename: None,
            body: reason(err).as_bytes().to_vec(),
            error_kind: Some(kind),
            job_id,
            stats: None,
            artifact: None,
        }
    }
}

/// Plain-text reason shown to the client for `err`.
pub fn reason(err: &ShrinkError) -> &'static str {
    match err {
        ShrinkError::SizeLimitExceeded { format, .. } if format.is_image() => {
            "Cannot compress image to the desired size."
        }
        _ => kind_reason(err.kind()),
    }
}

/// Plain-text reason for a failure kind.
pub fn kind_reason(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::MissingUpload => "No file uploaded.",
        ErrorKind::UnsupportedFormat => "Unsupported file format.",
        ErrorKind::CorruptInput => "The uploaded file could not be read.",
        ErrorKind::PreprocessFailed => "PDF preprocessing failed.",
        ErrorKind::RenderFailed => "PDF rendering failed.",
        ErrorKind::ToolLaunchFailed => "PDF tooling is unavailable.",
        ErrorKind::SizeLimitExceeded => "Cannot compress PDF to the desired size.",
        ErrorKind::CompressionFailed | ErrorKind::InternalIO => "Internal server error.",
    }
}

/// Turns requests into jobs and job results into responses.
#[derive(Debug, Clone)]
pub struct JobFacade {
    staging: Staging,
    config: CompressionConfig,
}

impl JobFacade {
    pub fn new(staging: Staging, config: CompressionConfig) -> Self {
        Self { staging, config }
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Handle one request end to end. Never fails: errors become responses.
    pub async fn handle(&self, endpoint: Endpoint, request: JobRequest) -> JobResponse {
        let job_id = Uuid::new_v4();
        let job = match self.intake(job_id, endpoint, request).await {
            Ok(job) => job,
            Err(err) => {
                self.config
                    .progress_callback
                    .on_job_error(job_id, err.kind(), err.stage());
                return reject(job_id, err);
            }
        };

        match job.run(&self.config).await {
            Ok(doc) => {
                info!(
                    "Job {job_id}: responding with {} bytes of {}",
                    doc.bytes.len(),
                    doc.format
                );
                JobResponse::success(job_id, doc)
            }
            Err(err) => reject(job_id, err),
        }
    }

    /// Validate the request and build its job. A rejected upload's temp
    /// file is released before this returns.
    async fn intake(
        &self,
        job_id: Uuid,
        endpoint: Endpoint,
        request: JobRequest,
    ) -> Result<CompressionJob, ShrinkError> {
        let JobRequest { upload, fields } = request;
        let upload = upload.ok_or(ShrinkError::MissingUpload)?;
        let options = JobOptions::from_fields(&fields);

        let mut artifacts = ArtifactSet::new(self.staging.clone(), job_id);
        let accepted = endpoint.accepted_formats();
        let (resolved, artifacts) = tokio::task::spawn_blocking(move || {
            let resolved = input::resolve(upload, accepted, &mut artifacts);
            (resolved, artifacts)
        })
        .await
        .map_err(|e| ShrinkError::Internal(format!("Intake task panicked: {}", e)))?;
        let resolved = resolved?;

        Ok(CompressionJob::with_artifacts(
            artifacts,
            resolved.format,
            options,
            resolved.bytes,
        ))
    }
}

fn reject(job_id: Uuid, err: ShrinkError) -> JobResponse {
    error!(
        "Job {job_id} failed: kind={} stage={}: {}",
        err.kind(),
        err.stage(),
        err
    );
    JobResponse::failure(job_id, &err)
}
