//! Progress-callback trait for per-job compression events.
//!
//! Inject an [`Arc<dyn CompressionProgressCallback>`] via
//! [`crate::config::CompressionConfigBuilder::progress_callback`] to receive
//! events as each job moves through its pipeline.
//!
//! # Example
//!
//! ```rust
//! use edgequake_shrink::{CompressionConfig, CompressionProgressCallback, Uuid};
//! use std::sync::Arc;
//!
//! struct PrintAttempts;
//!
//! impl CompressionProgressCallback for PrintAttempts {
//!     fn on_quality_attempt(&self, _job: Uuid, quality: u8, size: usize) {
//!         eprintln!("quality {quality}: {size} bytes");
//!     }
//! }
//!
//! let config = CompressionConfig::builder()
//!     .progress_callback(Arc::new(PrintAttempts))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::{ErrorKind, Stage};
use crate::format::DocumentFormat;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Called by the pipelines as a job progresses.
///
/// Implementations must be `Send + Sync`: jobs run concurrently and the
/// blocking stages call back from `spawn_blocking` threads. All methods have
/// default no-op implementations so callers only override what they need.
pub trait CompressionProgressCallback: Send + Sync {
    /// Called once when a job starts running its pipeline.
    fn on_job_start(&self, job: Uuid, format: DocumentFormat, input_len: usize) {
        let _ = (job, format, input_len);
    }

    /// Called after every encoding the image quality search performs.
    fn on_quality_attempt(&self, job: Uuid, quality: u8, size: usize) {
        let _ = (job, quality, size);
    }

    /// Called when a pipeline stage finishes successfully.
    fn on_stage_complete(&self, job: Uuid, stage: Stage, elapsed: Duration) {
        let _ = (job, stage, elapsed);
    }

    /// Called once when a job produced its output.
    fn on_job_complete(&self, job: Uuid, input_len: usize, output_len: usize) {
        let _ = (job, input_len, output_len);
    }

    /// Called once when a job failed.
    fn on_job_error(&self, job: Uuid, kind: ErrorKind, stage: Stage) {
        let _ = (job, kind, stage);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl CompressionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::CompressionConfig`].
pub type ProgressCallback = Arc<dyn CompressionProgressCallback>;
