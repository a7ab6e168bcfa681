//! Temp artifact management: collision-free staged paths and scoped release.
//!
//! ## Naming
//!
//! Every staged path is `<root>/<job-id>-<uuid>-<stage>.<ext>`. The fresh
//! UUID component makes paths unique across concurrent jobs, and across
//! processes sharing the same directory, without counters or locks.
//!
//! ## Release
//!
//! A job registers each artifact in its [`ArtifactSet`] the moment the path
//! is allocated. Dropping the set removes every registered file, so cleanup
//! runs on success, on `?` early returns, and during panic unwinding alike.
//! The one exception is the final output: [`ArtifactSet::deliver`] moves it
//! into a [`DeliveredArtifact`] guard that the caller drops only after the
//! response has been transmitted.

use crate::error::{ShrinkError, Stage};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// Handle to the staging working directory. Cheap to clone and share across jobs.
#[derive(Clone)]
pub struct Staging {
    inner: Arc<StagingInner>,
}

struct StagingInner {
    root: PathBuf,
    /// Keeps a self-owned directory alive for as long as any handle exists.
    _temp_dir: Option<TempDir>,
}

impl fmt::Debug for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Staging")
            .field("root", &self.inner.root)
            .field("temporary", &self.inner._temp_dir.is_some())
            .finish()
    }
}

impl Staging {
    /// Create the working directory if needed and return a handle to it.
    ///
    /// This is the explicit initialisation step a deployment runs once before
    /// accepting jobs.
    pub fn bootstrap(root: impl AsRef<Path>) -> Result<Self, ShrinkError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| ShrinkError::StagingUnavailable {
            path: root.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!("Staging directory ready: {}", root.display());
        Self::open(root)
    }

    /// Open an existing working directory. Fails if it does not exist.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, ShrinkError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ShrinkError::StagingUnavailable {
                path: root.to_path_buf(),
                reason: "not a directory (run bootstrap first)".to_string(),
            });
        }
        Ok(Self {
            inner: Arc::new(StagingInner {
                root: root.to_path_buf(),
                _temp_dir: None,
            }),
        })
    }

    /// A private working directory removed when the last handle is dropped.
    pub fn temporary() -> Result<Self, ShrinkError> {
        let dir = tempfile::Builder::new()
            .prefix("shrink-")
            .tempdir()
            .map_err(|e| ShrinkError::StagingUnavailable {
                path: std::env::temp_dir(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            inner: Arc::new(StagingInner {
                root: dir.path().to_path_buf(),
                _temp_dir: Some(dir),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Return a path no other allocation (in any job or process) will return.
    ///
    /// Nothing is created on disk; the stage that writes the path owns that.
    pub fn allocate(&self, job_id: Uuid, stage_label: &str, extension: &str) -> PathBuf {
        let ext = extension.trim_start_matches('.');
        let name = format!("{job_id}-{}-{stage_label}.{ext}", Uuid::new_v4());
        self.inner.root.join(name)
    }

    /// Remove a staged file. A missing file is not an error.
    ///
    /// Returns `Ok(true)` if a file was removed, `Ok(false)` if there was
    /// nothing to remove.
    pub fn release(path: &Path) -> io::Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Released {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release every path, logging failures instead of propagating them.
    ///
    /// Returns the number of files actually removed.
    pub fn release_all<'a>(paths: impl IntoIterator<Item = &'a Path>) -> usize {
        let mut removed = 0;
        for path in paths {
            match Self::release(path) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Failed to release {}: {}", path.display(), e),
            }
        }
        removed
    }
}

/// One registered artifact of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub stage: Stage,
    pub path: PathBuf,
}

/// The artifacts owned by a single job, released together on drop.
#[derive(Debug)]
pub struct ArtifactSet {
    staging: Staging,
    job_id: Uuid,
    entries: Vec<StagedArtifact>,
    sealed: bool,
}

impl ArtifactSet {
    pub fn new(staging: Staging, job_id: Uuid) -> Self {
        Self {
            staging,
            job_id,
            entries: Vec::new(),
            sealed: false,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Allocate and register a staged path for `stage`.
    pub fn allocate(&mut self, stage: Stage, extension: &str) -> Result<PathBuf, ShrinkError> {
        self.ensure_open(stage)?;
        let path = self.staging.allocate(self.job_id, stage.as_str(), extension);
        self.entries.push(StagedArtifact {
            stage,
            path: path.clone(),
        });
        Ok(path)
    }

    /// Take ownership of a file created outside the staging directory,
    /// e.g. the request-scoped upload the collaborator wrote.
    pub fn adopt(&mut self, stage: Stage, path: impl Into<PathBuf>) -> Result<(), ShrinkError> {
        self.ensure_open(stage)?;
        self.entries.push(StagedArtifact {
            stage,
            path: path.into(),
        });
        Ok(())
    }

    /// Exclude `path` from automatic release and hand it to the caller.
    ///
    /// Returns `None` if the path was never registered with this set.
    pub fn deliver(&mut self, path: &Path) -> Option<DeliveredArtifact> {
        let idx = self.entries.iter().position(|a| a.path == path)?;
        let artifact = self.entries.remove(idx);
        Some(DeliveredArtifact {
            path: Some(artifact.path),
        })
    }

    /// Forbid further allocations. Called once the job's result is decided.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Registered artifacts in allocation order.
    pub fn entries(&self) -> &[StagedArtifact] {
        &self.entries
    }

    /// Release every registered artifact now. Idempotent.
    pub fn release_all(&mut self) -> usize {
        let entries = std::mem::take(&mut self.entries);
        Staging::release_all(entries.iter().map(|a| a.path.as_path()))
    }

    fn ensure_open(&self, stage: Stage) -> Result<(), ShrinkError> {
        if self.sealed {
            return Err(ShrinkError::Internal(format!(
                "job {} already has a result; refusing to stage more artifacts for {stage}",
                self.job_id
            )));
        }
        Ok(())
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        let removed = self.release_all();
        if removed > 0 {
            debug!("Job {}: released {} staged artifacts", self.job_id, removed);
        }
    }
}

/// The final output file of a job, owned by the caller until transmitted.
///
/// Dropping the guard removes the file.
#[derive(Debug)]
pub struct DeliveredArtifact {
    path: Option<PathBuf>,
}

impl DeliveredArtifact {
    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Bare file name, safe to show to a caller.
    pub fn file_name(&self) -> Option<String> {
        self.path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Remove the file now instead of waiting for drop.
    pub fn release(mut self) -> io::Result<bool> {
        match self.path.take() {
            Some(path) => Staging::release(&path),
            None => Ok(false),
        }
    }
}

impl Drop for DeliveredArtifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = Staging::release(&path) {
                warn!("Failed to release delivered artifact {}: {}", path.display(), e);
            }
        }
    }
}
