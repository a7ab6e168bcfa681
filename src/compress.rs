//! Library entry points for compressing a document without the façade.
//!
//! [`compress`] takes bytes and a format, [`compress_file`] reads a path and
//! writes the result atomically, and [`compress_sync`] wraps [`compress`]
//! for callers without a runtime. All three create one
//! [`CompressionJob`] per document.

use crate::config::CompressionConfig;
use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use crate::job::{CompressionJob, JobOptions};
use crate::output::{CompressedDocument, CompressionStats};
use crate::pipeline::input;
use crate::staging::Staging;
use std::path::Path;
use tracing::info;

/// Compress `bytes` as `format`.
///
/// # Example
/// ```rust,no_run
/// use edgequake_shrink::{compress, CompressionConfig, DocumentFormat, JobOptions, Staging};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let staging = Staging::temporary()?;
/// let bytes = std::fs::read("scan.pdf")?;
/// let doc = compress(
///     bytes,
///     DocumentFormat::Pdf,
///     JobOptions { grayscale: true },
///     &staging,
///     &CompressionConfig::default(),
/// )
/// .await?;
/// println!("{} bytes", doc.bytes.len());
/// # Ok(())
/// # }
/// ```
pub async fn compress(
    bytes: Vec<u8>,
    format: DocumentFormat,
    options: JobOptions,
    staging: &Staging,
    config: &CompressionConfig,
) -> Result<CompressedDocument, ShrinkError> {
    input::check_payload(format, &bytes)?;
    CompressionJob::new(staging, format, options, bytes)
        .run(config)
        .await
}

/// Compress the file at `input_path` and write the result to `output_path`.
///
/// The format comes from the input's extension. Uses atomic write (temp
/// file + rename) so a failed job never leaves a partial output.
pub async fn compress_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    options: JobOptions,
    staging: &Staging,
    config: &CompressionConfig,
) -> Result<CompressionStats, ShrinkError> {
    let input_path = input_path.as_ref();
    let path = output_path.as_ref();
    let format = DocumentFormat::from_filename(&input_path.to_string_lossy())?;
    let bytes = tokio::fs::read(input_path)
        .await
        .map_err(|e| ShrinkError::io(Stage::Intake, input_path, e))?;

    let doc = compress(bytes, format, options, staging, config).await?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ShrinkError::io(Stage::Deliver, parent, e))?;
        }
    }

    let tmp_path = path.with_extension(format!("{}.tmp", format.extension()));
    tokio::fs::write(&tmp_path, &doc.bytes)
        .await
        .map_err(|e| ShrinkError::io(Stage::Deliver, &tmp_path, e))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(ShrinkError::io(Stage::Deliver, path, e));
    }

    info!(
        "Wrote {} ({} bytes, {:.1}% of input)",
        path.display(),
        doc.stats.output_bytes,
        doc.stats.ratio() * 100.0
    );
    Ok(doc.stats)
}

/// Synchronous wrapper around [`compress`].
///
/// Creates a temporary tokio runtime internally.
pub fn compress_sync(
    bytes: Vec<u8>,
    format: DocumentFormat,
    options: JobOptions,
    staging: &Staging,
    config: &CompressionConfig,
) -> Result<CompressedDocument, ShrinkError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ShrinkError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(compress(bytes, format, options, staging, config))
}
