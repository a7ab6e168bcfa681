//! One compression job: an id, its input, its options and its staged files.
//!
//! A job is created once per accepted upload, mutated only by the pipeline
//! it runs, and consumed by [`CompressionJob::run`]. Its [`ArtifactSet`] is
//! sealed when the result is decided and dropped before `run` returns, so
//! the only file that can outlive the job is the delivered output artifact.

use crate::config::{CompressionConfig, PdfStrategy};
use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use crate::output::{CompressedDocument, CompressionStats, StageTiming};
use crate::pipeline::{external, image, library, PdfOutcome};
use crate::staging::{ArtifactSet, Staging};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-request choices read from the options collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobOptions {
    /// Convert PDF output to gray. Ignored for images.
    pub grayscale: bool,
}

impl JobOptions {
    /// Read options from a flat string map. Only the literal `"true"`
    /// enables `grayscale`.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        Self {
            grayscale: fields.get("grayscale").is_some_and(|v| v == "true"),
        }
    }
}

/// A unit of work with a unique id and exclusive ownership of its artifacts.
#[derive(Debug)]
pub struct CompressionJob {
    id: Uuid,
    format: DocumentFormat,
    options: JobOptions,
    input: Vec<u8>,
    artifacts: ArtifactSet,
}

impl CompressionJob {
    /// Create a job with a fresh id staging under `staging`.
    pub fn new(staging: &Staging, format: DocumentFormat, options: JobOptions, input: Vec<u8>) -> Self {
        let artifacts = ArtifactSet::new(staging.clone(), Uuid::new_v4());
        Self::with_artifacts(artifacts, format, options, input)
    }

    /// Create a job around an artifact set that already holds files, such
    /// as an adopted upload. The job id is the set's id.
    pub fn with_artifacts(
        artifacts: ArtifactSet,
        format: DocumentFormat,
        options: JobOptions,
        input: Vec<u8>,
    ) -> Self {
        Self {
            id: artifacts.job_id(),
            format,
            options,
            input,
            artifacts,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    pub fn options(&self) -> JobOptions {
        self.options
    }

    /// Run the pipeline for this job's format.
    ///
    /// The blocking work runs on tokio's blocking pool. Every staged file
    /// except the delivered output is gone when this returns, whatever the
    /// outcome.
    pub async fn run(self, config: &CompressionConfig) -> Result<CompressedDocument, ShrinkError> {
        let id = self.id;
        let callback = config.progress_callback.clone();
        let config = config.clone();

        let result = tokio::task::spawn_blocking(move || self.run_blocking(&config))
            .await
            .map_err(|e| ShrinkError::Internal(format!("Job task panicked: {}", e)))
            .and_then(|r| r);

        match &result {
            Ok(doc) => callback.on_job_complete(
                id,
                doc.stats.input_bytes as usize,
                doc.bytes.len(),
            ),
            Err(e) => callback.on_job_error(id, e.kind(), e.stage()),
        }
        result
    }

    /// Synchronous body of [`run`](Self::run).
    pub fn run_blocking(self, config: &CompressionConfig) -> Result<CompressedDocument, ShrinkError> {
        let started = Instant::now();
        let CompressionJob {
            id,
            format,
            options,
            input,
            mut artifacts,
        } = self;

        info!("Job {id}: compressing {} bytes of {format}", input.len());
        config.progress_callback.on_job_start(id, format, input.len());

        let result = dispatch(id, format, options, &input, &mut artifacts, config);
        artifacts.seal();
        let released = artifacts.release_all();
        debug!("Job {id}: released {released} staged artifacts");

        let mut doc = result?;
        doc.stats.job_id = id.to_string();
        doc.stats.input_bytes = input.len() as u64;
        doc.stats.output_bytes = doc.bytes.len() as u64;
        doc.stats.total_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Job {id}: done, {} → {} bytes ({:.1}%) in {}ms",
            doc.stats.input_bytes,
            doc.stats.output_bytes,
            doc.stats.ratio() * 100.0,
            doc.stats.total_duration_ms
        );
        Ok(doc)
    }
}

fn dispatch(
    id: Uuid,
    format: DocumentFormat,
    options: JobOptions,
    input: &[u8],
    artifacts: &mut ArtifactSet,
    config: &CompressionConfig,
) -> Result<CompressedDocument, ShrinkError> {
    if format.is_image() {
        return compress_image(id, format, input, config);
    }

    let PdfOutcome {
        bytes,
        artifact,
        stages,
    } = match config.pdf_strategy {
        PdfStrategy::External => external::compress(input, options.grayscale, artifacts, config)?,
        PdfStrategy::Library => library::compress(input, options.grayscale, config, id)?,
    };

    Ok(CompressedDocument {
        bytes,
        format,
        artifact,
        stats: CompressionStats {
            strategy: Some(config.pdf_strategy),
            stages,
            ..Default::default()
        },
    })
}

fn compress_image(
    id: Uuid,
    format: DocumentFormat,
    input: &[u8],
    config: &CompressionConfig,
) -> Result<CompressedDocument, ShrinkError> {
    let started = Instant::now();
    let outcome = image::compress(input, format, config, id)?;
    let encode_time = started.elapsed();
    config
        .progress_callback
        .on_stage_complete(id, Stage::Encode, encode_time);

    let size = outcome.bytes.len() as u64;
    if size > config.max_output_bytes {
        return Err(ShrinkError::SizeLimitExceeded {
            stage: Stage::SizeCheck,
            format,
            size,
            limit: config.max_output_bytes,
        });
    }

    Ok(CompressedDocument {
        bytes: outcome.bytes,
        format,
        artifact: None,
        stats: CompressionStats {
            attempts: outcome.attempts,
            chosen_quality: outcome.chosen_quality,
            stages: vec![StageTiming {
                stage: Stage::Encode,
                duration_ms: encode_time.as_millis() as u64,
            }],
            ..Default::default()
        },
    })
}
