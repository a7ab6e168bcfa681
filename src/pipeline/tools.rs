//! Blocking execution of external command-line tools.
//!
//! A tool run is one value: launch, wait for exit, collect exit status and
//! both output streams. Nothing is streamed to the caller and nothing runs
//! in the background; the next stage starts only after the process exited.
//!
//! No timeout is applied. A tool that never exits stalls its job.

use std::ffi::OsString;
use std::io;
use std::process::{Command, Stdio};
use tracing::debug;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr as lossy UTF-8, trimmed.
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Executes a program to completion.
///
/// `Err` means the process could not be started at all (binary missing, not
/// executable); a process that started and failed is `Ok` with a non-zero
/// status.
pub trait ToolRunner: Send + Sync {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput>;
}

/// Runs tools with [`std::process::Command`], resolving `program` on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

impl ToolRunner for SystemToolRunner {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput> {
        debug!("Executing {} with {} args", program, args.len());
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(ToolOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}
