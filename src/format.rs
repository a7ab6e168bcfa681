//! Declared document formats.
//!
//! The format is derived from the uploaded filename's extension and is
//! authoritative for routing: a `.png` upload goes through the PNG encoder
//! even if its bytes happen to be a JPEG. Content sniffing is left to the
//! decoder, which reports a mismatch as corrupt input.

use crate::error::ShrinkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Formats the pipelines know how to shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Jpeg,
    Png,
    Webp,
    Pdf,
}

impl DocumentFormat {
    /// Parse a bare extension (`"jpg"`, `".PNG"`), case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(DocumentFormat::Jpeg),
            "png" => Some(DocumentFormat::Png),
            "webp" => Some(DocumentFormat::Webp),
            "pdf" => Some(DocumentFormat::Pdf),
            _ => None,
        }
    }

    /// Derive the format from an uploaded filename.
    ///
    /// Only the extension is consulted; the rest of the name is never used.
    pub fn from_filename(filename: &str) -> Result<Self, ShrinkError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        Self::from_extension(ext).ok_or_else(|| ShrinkError::UnsupportedFormat {
            extension: if ext.is_empty() {
                "<none>".to_string()
            } else {
                ext.to_ascii_lowercase()
            },
        })
    }

    /// MIME type used in the response.
    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Png => "image/png",
            DocumentFormat::Webp => "image/webp",
            DocumentFormat::Pdf => "application/pdf",
        }
    }

    /// Canonical extension (without the dot) for output and staged files.
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Jpeg => "jpg",
            DocumentFormat::Png => "png",
            DocumentFormat::Webp => "webp",
            DocumentFormat::Pdf => "pdf",
        }
    }

    pub fn is_image(self) -> bool {
        !matches!(self, DocumentFormat::Pdf)
    }

    /// The `image` crate format for raster formats; `None` for PDF.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            DocumentFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            DocumentFormat::Png => Some(image::ImageFormat::Png),
            DocumentFormat::Webp => Some(image::ImageFormat::WebP),
            DocumentFormat::Pdf => None,
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}
