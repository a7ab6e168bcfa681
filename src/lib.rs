//! # edgequake-shrink
//!
//! Shrink uploaded raster images and PDFs while keeping their format.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Intake   adopt the temp file, pick the format from the extension, sniff %PDF
//!  ├─ 2. Job      fresh UUID, private set of staged files
//!  ├─ 3a. Image   decode → encode at 80, 70, … 10 until it stops getting smaller
//!  ├─ 3b. PDF     qpdf (uncompress streams) → Ghostscript (/screen, 72 dpi)
//!  │              or in-process lopdf rewrite
//!  ├─ 4. Check    reject anything over the 200 MiB ceiling
//!  └─ 5. Respond  bytes + MIME + `<job-id>-output.<ext>`, then release files
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_shrink::{CompressionConfig, Endpoint, JobFacade, JobRequest, Staging, Upload};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let facade = JobFacade::new(Staging::bootstrap("uploads")?, CompressionConfig::default());
//!     let upload = Upload::from_bytes("scan.pdf", std::fs::read("scan.pdf")?);
//!     let request = JobRequest::new(upload).with_field("grayscale", "true");
//!
//!     let response = facade.handle(Endpoint::Pdf, request).await;
//!     eprintln!("{} {}", response.status, response.content_type);
//!     response.transmit(&mut std::io::stdout())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `shrink` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-shrink = { version = "0.1", default-features = false }
//! ```
//!
//! ## PDF strategies
//!
//! | Strategy | Needs | Typical result |
//! |----------|-------|----------------|
//! | `External` (default) | `qpdf` and `gs` on `PATH` | images downsampled to 72 dpi |
//! | `Library` | nothing | streams recompressed, optional true grayscale |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod compress;
pub mod config;
pub mod error;
pub mod facade;
pub mod format;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod staging;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use compress::{compress, compress_file, compress_sync};
pub use config::{CompressionConfig, CompressionConfigBuilder, PdfStrategy, DEFAULT_MAX_OUTPUT_BYTES};
pub use error::{ErrorKind, ShrinkError, Stage};
pub use facade::{Endpoint, JobFacade, JobRequest, JobResponse};
pub use format::DocumentFormat;
pub use job::{CompressionJob, JobOptions};
pub use output::{CompressedDocument, CompressionStats, QualityAttempt, StageTiming};
pub use pipeline::input::{Upload, UploadSource};
pub use pipeline::tools::{SystemToolRunner, ToolOutput, ToolRunner};
pub use progress::{CompressionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use staging::{ArtifactSet, DeliveredArtifact, Staging};
pub use uuid::Uuid;
