//! Result types returned by a successful job.

use crate::config::PdfStrategy;
use crate::error::Stage;
use crate::format::DocumentFormat;
use crate::staging::DeliveredArtifact;
use serde::{Deserialize, Serialize};

/// The compressed document plus what it took to produce it.
#[derive(Debug)]
pub struct CompressedDocument {
    /// The output payload.
    pub bytes: Vec<u8>,
    /// Output format; always the declared input format.
    pub format: DocumentFormat,
    /// The on-disk final artifact, when the pipeline produced one.
    ///
    /// Released when dropped, so keep it alive until `bytes` have been sent.
    pub artifact: Option<DeliveredArtifact>,
    pub stats: CompressionStats,
}

impl CompressedDocument {
    /// Suggested attachment filename: `<job-id>-output.<ext>`. Never a path.
    pub fn attachment_filename(&self) -> String {
        format!("{}-output.{}", self.stats.job_id, self.format.extension())
    }
}

/// Aggregate numbers for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionStats {
    pub job_id: String,
    pub input_bytes: u64,
    pub output_bytes: u64,
    /// Every quality tried by the image search, in order.
    pub attempts: Vec<QualityAttempt>,
    /// Quality of the returned encoding; `None` for PDFs or when the
    /// original image was kept.
    pub chosen_quality: Option<u8>,
    /// PDF strategy that ran; `None` for images.
    pub strategy: Option<PdfStrategy>,
    pub stages: Vec<StageTiming>,
    pub total_duration_ms: u64,
}

impl CompressionStats {
    /// `output / input`; 1.0 when the input was empty.
    pub fn ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

/// One encoding performed by the image quality search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAttempt {
    pub quality: u8,
    pub size: usize,
}

/// Wall-clock time spent in one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
}
