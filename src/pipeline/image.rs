//! Image quality search: re-encode at falling quality until it stops paying off.
//!
//! ## Algorithm
//!
//! ```text
//! decode ─▶ fit ─▶ encode@80 ─▶ encode@70 ─▶ … ─▶ encode@10
//!                      │             │
//!                      └─ best ◀─────┴─ stop as soon as an encoding is not
//!                                      smaller than the best one so far
//! ```
//!
//! The walk is bounded by the quality schedule (80 → 10 in steps of 10 by
//! default, so at most eight encodings). The first encoding is always a
//! candidate; after that an encoding only replaces the best if it is
//! strictly smaller, and the search returns the best-ever encoding rather
//! than the last one it produced.
//!
//! ## Encoders
//!
//! | Format | Quality knob |
//! |--------|--------------|
//! | JPEG | baseline JPEG quality |
//! | PNG  | lossless; below 70 switches to best deflate with adaptive filtering |
//! | WebP | lossless; quality has no effect, so the search stops on the second pass |
//!
//! Everything here is CPU-bound and synchronous. Callers run it inside
//! `spawn_blocking`.

use crate::config::CompressionConfig;
use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use crate::output::QualityAttempt;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::{debug, info};
use uuid::Uuid;

/// Below this quality PNG output switches to maximum deflate effort.
const PNG_BEST_COMPRESSION_BELOW: u8 = 70;

/// What the search settled on.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub bytes: Vec<u8>,
    /// Every encoding tried, in order.
    pub attempts: Vec<QualityAttempt>,
    /// Quality of `bytes`; `None` when the original input was kept.
    pub chosen_quality: Option<u8>,
}

/// Shrink an encoded image, keeping its format.
///
/// Fails with `UnsupportedFormat` before decoding anything when `format`
/// is not a raster format.
pub fn compress(
    input: &[u8],
    format: DocumentFormat,
    config: &CompressionConfig,
    job: Uuid,
) -> Result<ImageOutcome, ShrinkError> {
    let image_format = format
        .image_format()
        .ok_or_else(|| ShrinkError::UnsupportedFormat {
            extension: format.extension().to_string(),
        })?;

    let img = decode(input, image_format)?;
    let img = fit_within(img, config.max_dimension);

    let callback = &config.progress_callback;
    let (chosen_quality, bytes, attempts) = search_quality(
        &config.quality_schedule(),
        |quality| encode(&img, format, quality),
        |quality, size| callback.on_quality_attempt(job, quality, size),
    )?;

    if config.keep_smaller_original && input.len() < bytes.len() {
        info!(
            "Job {}: best encoding ({} bytes @ q{}) is larger than the input ({} bytes); keeping the original",
            job,
            bytes.len(),
            chosen_quality,
            input.len()
        );
        return Ok(ImageOutcome {
            bytes: input.to_vec(),
            attempts,
            chosen_quality: None,
        });
    }

    info!(
        "Job {}: {} → {} bytes at quality {} after {} attempts",
        job,
        input.len(),
        bytes.len(),
        chosen_quality,
        attempts.len()
    );

    Ok(ImageOutcome {
        bytes,
        attempts,
        chosen_quality: Some(chosen_quality),
    })
}

/// Walk `schedule`, returning `(quality, bytes, attempts)` for the smallest
/// encoding seen before the first non-improving one.
pub(crate) fn search_quality<E, A>(
    schedule: &[u8],
    mut encode: E,
    mut on_attempt: A,
) -> Result<(u8, Vec<u8>, Vec<QualityAttempt>), ShrinkError>
where
    E: FnMut(u8) -> Result<Vec<u8>, ShrinkError>,
    A: FnMut(u8, usize),
{
    let mut best: Option<(u8, Vec<u8>)> = None;
    let mut attempts = Vec::with_capacity(schedule.len());

    for &quality in schedule {
        let encoded = encode(quality)?;
        let size = encoded.len();
        debug!("quality {} → {} bytes", quality, size);
        attempts.push(QualityAttempt { quality, size });
        on_attempt(quality, size);

        let improved = best.as_ref().map_or(true, |(_, b)| size < b.len());
        if !improved {
            break;
        }
        best = Some((quality, encoded));
    }

    let (quality, bytes) =
        best.ok_or_else(|| ShrinkError::Internal("empty quality schedule".into()))?;
    Ok((quality, bytes, attempts))
}

fn decode(input: &[u8], format: ImageFormat) -> Result<DynamicImage, ShrinkError> {
    let img = image::load_from_memory_with_format(input, format).map_err(|e| {
        ShrinkError::CorruptInput {
            stage: Stage::Decode,
            detail: e.to_string(),
        }
    })?;
    debug!("Decoded {:?} {}x{}", format, img.width(), img.height());
    Ok(img)
}

/// Constrain the image to `max_dimension` on its longest edge. Never enlarges.
fn fit_within(img: DynamicImage, max_dimension: Option<u32>) -> DynamicImage {
    match max_dimension {
        Some(max) if img.width() > max || img.height() > max => {
            let resized = img.resize(max, max, FilterType::Lanczos3);
            debug!(
                "Resized {}x{} → {}x{}",
                img.width(),
                img.height(),
                resized.width(),
                resized.height()
            );
            resized
        }
        _ => img,
    }
}

/// Encode `img` as `format` at `quality`.
pub(crate) fn encode(
    img: &DynamicImage,
    format: DocumentFormat,
    quality: u8,
) -> Result<Vec<u8>, ShrinkError> {
    let mut buf = Vec::new();
    let cursor = Cursor::new(&mut buf);
    let result = match format {
        DocumentFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(cursor, quality.clamp(1, 100));
            img.to_rgb8().write_with_encoder(encoder)
        }
        DocumentFormat::Png => {
            let compression = if quality < PNG_BEST_COMPRESSION_BELOW {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let encoder = PngEncoder::new_with_quality(cursor, compression, PngFilterType::Adaptive);
            img.write_with_encoder(encoder)
        }
        DocumentFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(cursor);
            if img.color().has_alpha() {
                img.to_rgba8().write_with_encoder(encoder)
            } else {
                img.to_rgb8().write_with_encoder(encoder)
            }
        }
        DocumentFormat::Pdf => {
            return Err(ShrinkError::UnsupportedFormat {
                extension: format.extension().to_string(),
            })
        }
    };
    result.map_err(|e| ShrinkError::CompressionFailed {
        quality,
        detail: e.to_string(),
    })?;
    Ok(buf)
}
