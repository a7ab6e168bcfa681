//! Pipeline stages for image and PDF compression.
//!
//! Each submodule implements one pipeline or one concern shared by the
//! pipelines. All of them are synchronous; [`crate::job`] runs them inside
//! `spawn_blocking`.
//!
//! ## Data Flow
//!
//! ```text
//! upload ──▶ input ──┬──▶ image ─────────────────────────────▶ bytes
//!                    │
//!                    ├──▶ external: normalize ─▶ qpdf ─▶ gs ─▶ size check ─▶ artifact
//!                    │
//!                    └──▶ library:  load ─▶ recolor ─▶ save ─▶ size check ─▶ bytes
//! ```
//!
//! 1. [`input`]:    resolve the upload, pick the format, sniff PDF magic
//! 2. [`image`]:    quality search over the raster encoders
//! 3. [`external`]: default strategy, subprocess pipeline through [`tools`]
//! 4. [`library`]:  fallback strategy, in-process rewrite on the `lopdf` model

pub mod external;
pub mod image;
pub mod input;
pub mod library;
pub mod tools;

use crate::error::Stage;
use crate::output::StageTiming;
use crate::progress::ProgressCallback;
use crate::staging::DeliveredArtifact;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Result of either PDF strategy.
#[derive(Debug)]
pub struct PdfOutcome {
    pub bytes: Vec<u8>,
    /// The on-disk render output (external strategy only).
    pub artifact: Option<DeliveredArtifact>,
    pub stages: Vec<StageTiming>,
}

/// Measures consecutive stages and reports each to the progress callback.
pub(crate) struct StageTimer<'a> {
    job: Uuid,
    callback: &'a ProgressCallback,
    started: Instant,
    timings: Vec<StageTiming>,
}

impl<'a> StageTimer<'a> {
    pub(crate) fn new(job: Uuid, callback: &'a ProgressCallback) -> Self {
        Self {
            job,
            callback,
            started: Instant::now(),
            timings: Vec::new(),
        }
    }

    /// Close the running stage and start timing the next one.
    pub(crate) fn finish(&mut self, stage: Stage) {
        let elapsed = self.started.elapsed();
        debug!("Job {}: {} finished in {:?}", self.job, stage, elapsed);
        self.callback.on_stage_complete(self.job, stage, elapsed);
        self.timings.push(StageTiming {
            stage,
            duration_ms: elapsed.as_millis() as u64,
        });
        self.started = Instant::now();
    }

    pub(crate) fn into_timings(self) -> Vec<StageTiming> {
        self.timings
    }
}
