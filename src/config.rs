//! Configuration types for image and PDF compression.
//!
//! All pipeline behaviour is controlled through [`CompressionConfig`], built
//! via its [`CompressionConfigBuilder`]. One config is shared by every job a
//! process runs; per-request choices (grayscale) travel in
//! [`crate::job::JobOptions`] instead.

use crate::error::ShrinkError;
use crate::pipeline::tools::{SystemToolRunner, ToolRunner};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 200 MiB: the largest output a job may return.
pub const DEFAULT_MAX_OUTPUT_BYTES: u64 = 200 * 1024 * 1024;

/// Configuration for the compression pipelines.
///
/// Built via [`CompressionConfig::builder()`] or using
/// [`CompressionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_shrink::{CompressionConfig, PdfStrategy};
///
/// let config = CompressionConfig::builder()
///     .max_output_bytes(50 * 1024 * 1024)
///     .pdf_strategy(PdfStrategy::External)
///     .render_tool("gswin64c")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct CompressionConfig {
    /// Output size ceiling in bytes. Default: 200 MiB.
    ///
    /// Exceeding it is a terminal rejection; no second, lower-quality pass
    /// is attempted.
    pub max_output_bytes: u64,

    /// First encoder quality the image search tries. Default: 80.
    pub initial_quality: u8,

    /// Quality floor; the search never encodes below it. Default: 10.
    pub min_quality: u8,

    /// Quality decrement per iteration. Default: 10.
    pub quality_step: u8,

    /// Optional cap on the longest image edge in pixels. Default: None.
    ///
    /// Resizing only ever shrinks; an image already inside the box is
    /// encoded at its original dimensions.
    pub max_dimension: Option<u32>,

    /// Return the original image bytes when no encoding beats them. Default: true.
    pub keep_smaller_original: bool,

    /// Which PDF pipeline runs. Default: [`PdfStrategy::External`].
    pub pdf_strategy: PdfStrategy,

    /// Structural normalisation tool (`PdfStrategy::External`). Default: `qpdf`.
    pub preprocess_tool: String,

    /// Raster re-encoding tool (`PdfStrategy::External`). Default: `gs`.
    pub render_tool: String,

    /// `-dCompatibilityLevel` passed to the render tool. Default: `1.4`.
    pub compatibility_level: String,

    /// Downsample resolution (dpi) for color, gray and mono images. Default: 72.
    pub image_resolution: u32,

    /// JPEG quality for images re-encoded during grayscale conversion
    /// in `PdfStrategy::Library`. Default: 60.
    pub library_jpeg_quality: u8,

    /// Subprocess executor for `PdfStrategy::External`. Defaults to [`SystemToolRunner`].
    pub tool_runner: Arc<dyn ToolRunner>,

    /// Receives per-job progress events. Defaults to a no-op.
    pub progress_callback: ProgressCallback,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            initial_quality: 80,
            min_quality: 10,
            quality_step: 10,
            max_dimension: None,
            keep_smaller_original: true,
            pdf_strategy: PdfStrategy::default(),
            preprocess_tool: "qpdf".to_string(),
            render_tool: "gs".to_string(),
            compatibility_level: "1.4".to_string(),
            image_resolution: 72,
            library_jpeg_quality: 60,
            tool_runner: Arc::new(SystemToolRunner),
            progress_callback: Arc::new(NoopProgressCallback),
        }
    }
}

impl fmt::Debug for CompressionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressionConfig")
            .field("max_output_bytes", &self.max_output_bytes)
            .field("initial_quality", &self.initial_quality)
            .field("min_quality", &self.min_quality)
            .field("quality_step", &self.quality_step)
            .field("max_dimension", &self.max_dimension)
            .field("keep_smaller_original", &self.keep_smaller_original)
            .field("pdf_strategy", &self.pdf_strategy)
            .field("preprocess_tool", &self.preprocess_tool)
            .field("render_tool", &self.render_tool)
            .field("compatibility_level", &self.compatibility_level)
            .field("image_resolution", &self.image_resolution)
            .field("library_jpeg_quality", &self.library_jpeg_quality)
            .field("tool_runner", &"<dyn ToolRunner>")
            .field("progress_callback", &"<dyn CompressionProgressCallback>")
            .finish()
    }
}

impl CompressionConfig {
    /// Create a new builder for `CompressionConfig`.
    pub fn builder() -> CompressionConfigBuilder {
        CompressionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The quality sequence the image search walks, highest first.
    pub fn quality_schedule(&self) -> Vec<u8> {
        let mut qualities = Vec::new();
        let mut q = self.initial_quality;
        loop {
            qualities.push(q);
            if q <= self.min_quality {
                break;
            }
            q = q.saturating_sub(self.quality_step).max(self.min_quality);
        }
        qualities
    }
}

/// Builder for [`CompressionConfig`].
#[derive(Debug)]
pub struct CompressionConfigBuilder {
    config: CompressionConfig,
}

impl CompressionConfigBuilder {
    pub fn max_output_bytes(mut self, bytes: u64) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    pub fn initial_quality(mut self, q: u8) -> Self {
        self.config.initial_quality = q;
        self
    }

    pub fn min_quality(mut self, q: u8) -> Self {
        self.config.min_quality = q;
        self
    }

    pub fn quality_step(mut self, step: u8) -> Self {
        self.config.quality_step = step;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = Some(px.max(1));
        self
    }

    pub fn keep_smaller_original(mut self, v: bool) -> Self {
        self.config.keep_smaller_original = v;
        self
    }

    pub fn pdf_strategy(mut self, strategy: PdfStrategy) -> Self {
        self.config.pdf_strategy = strategy;
        self
    }

    pub fn preprocess_tool(mut self, program: impl Into<String>) -> Self {
        self.config.preprocess_tool = program.into();
        self
    }

    pub fn render_tool(mut self, program: impl Into<String>) -> Self {
        self.config.render_tool = program.into();
        self
    }

    pub fn compatibility_level(mut self, level: impl Into<String>) -> Self {
        self.config.compatibility_level = level.into();
        self
    }

    pub fn image_resolution(mut self, dpi: u32) -> Self {
        self.config.image_resolution = dpi;
        self
    }

    pub fn library_jpeg_quality(mut self, q: u8) -> Self {
        self.config.library_jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn tool_runner(mut self, runner: Arc<dyn ToolRunner>) -> Self {
        self.config.tool_runner = runner;
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = callback;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<CompressionConfig, ShrinkError> {
        let c = &self.config;
        if c.min_quality == 0 || c.initial_quality > 100 {
            return Err(ShrinkError::InvalidConfig(format!(
                "qualities must be within 1–100, got {}..{}",
                c.min_quality, c.initial_quality
            )));
        }
        if c.initial_quality < c.min_quality {
            return Err(ShrinkError::InvalidConfig(format!(
                "initial quality {} is below the floor {}",
                c.initial_quality, c.min_quality
            )));
        }
        if c.quality_step == 0 {
            return Err(ShrinkError::InvalidConfig(
                "quality step must be ≥ 1".into(),
            ));
        }
        if c.max_output_bytes == 0 {
            return Err(ShrinkError::InvalidConfig(
                "max output size must be ≥ 1 byte".into(),
            ));
        }
        if c.image_resolution == 0 {
            return Err(ShrinkError::InvalidConfig(
                "image resolution must be ≥ 1 dpi".into(),
            ));
        }
        if c.preprocess_tool.trim().is_empty() || c.render_tool.trim().is_empty() {
            return Err(ShrinkError::InvalidConfig(
                "tool names must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which PDF pipeline a job runs.
///
/// | Strategy | Needs | Grayscale |
/// |----------|-------|-----------|
/// | `External` | `qpdf` and Ghostscript on `PATH` | Ghostscript color conversion |
/// | `Library`  | nothing outside the process | content-stream and image recoloring |
///
/// There is no automatic fallback: a missing tool surfaces as
/// `ToolLaunchFailed` so operators notice a broken deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PdfStrategy {
    /// qpdf + Ghostscript subprocess pipeline. (default)
    #[default]
    External,
    /// In-process pipeline on the `lopdf` document model.
    Library,
}
