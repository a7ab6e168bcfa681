//! `PdfStrategy::External`: shrink a PDF with `qpdf` followed by Ghostscript.
//!
//! ## Stages
//!
//! ```text
//! bytes ─▶ normalize.pdf ─▶ qpdf ─▶ preprocess.pdf ─▶ gs ─▶ render.pdf ─▶ size check
//! ```
//!
//! Every intermediate path is allocated from the job's [`ArtifactSet`], so a
//! failure at any stage leaves the files to the set's drop. Only the render
//! output escapes, handed to the caller as a [`DeliveredArtifact`] once the
//! size check passed.
//!
//! A stage runs strictly after the previous one exited and its output file
//! was checked: the file must exist and be non-empty, and the render output
//! must additionally start with `%PDF`.
//!
//! [`DeliveredArtifact`]: crate::staging::DeliveredArtifact

use super::tools::{ToolOutput, ToolRunner};
use super::{PdfOutcome, StageTimer};
use crate::config::CompressionConfig;
use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use crate::staging::ArtifactSet;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Run the subprocess pipeline on `input`.
pub fn compress(
    input: &[u8],
    grayscale: bool,
    artifacts: &mut ArtifactSet,
    config: &CompressionConfig,
) -> Result<PdfOutcome, ShrinkError> {
    let job = artifacts.job_id();
    let runner = config.tool_runner.as_ref();
    let mut timer = StageTimer::new(job, &config.progress_callback);

    let normalized = artifacts.allocate(Stage::Normalize, "pdf")?;
    fs::write(&normalized, input).map_err(|e| ShrinkError::io(Stage::Normalize, &normalized, e))?;
    timer.finish(Stage::Normalize);

    let preprocessed = artifacts.allocate(Stage::Preprocess, "pdf")?;
    run_stage(
        runner,
        Stage::Preprocess,
        &config.preprocess_tool,
        &preprocess_args(&normalized, &preprocessed),
    )?;
    let size = check_output(Stage::Preprocess, &config.preprocess_tool, &preprocessed)?;
    debug!("Job {job}: preprocess wrote {size} bytes");
    timer.finish(Stage::Preprocess);

    let rendered = artifacts.allocate(Stage::Render, "pdf")?;
    run_stage(
        runner,
        Stage::Render,
        &config.render_tool,
        &render_args(&preprocessed, &rendered, grayscale, config),
    )?;
    check_output(Stage::Render, &config.render_tool, &rendered)?;
    let bytes = fs::read(&rendered).map_err(|e| ShrinkError::io(Stage::Render, &rendered, e))?;
    if !bytes.starts_with(b"%PDF") {
        return Err(ShrinkError::InvalidStageOutput {
            stage: Stage::Render,
            tool: config.render_tool.clone(),
            detail: "output does not start with %PDF".into(),
        });
    }
    timer.finish(Stage::Render);

    let size = bytes.len() as u64;
    if size > config.max_output_bytes {
        return Err(ShrinkError::SizeLimitExceeded {
            stage: Stage::SizeCheck,
            format: DocumentFormat::Pdf,
            size,
            limit: config.max_output_bytes,
        });
    }
    timer.finish(Stage::SizeCheck);

    info!(
        "Job {job}: PDF {} → {} bytes via {} + {}{}",
        input.len(),
        size,
        config.preprocess_tool,
        config.render_tool,
        if grayscale { " (grayscale)" } else { "" }
    );

    let artifact = artifacts.deliver(&rendered);
    Ok(PdfOutcome {
        bytes,
        artifact,
        stages: timer.into_timings(),
    })
}

/// `qpdf --stream-data=uncompress <in> <out>`
pub(crate) fn preprocess_args(input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        OsString::from("--stream-data=uncompress"),
        input.as_os_str().to_os_string(),
        output.as_os_str().to_os_string(),
    ]
}

/// Ghostscript `pdfwrite` arguments with `/screen` presets and bicubic
/// downsampling of every image class to the configured resolution.
pub(crate) fn render_args(
    input: &Path,
    output: &Path,
    grayscale: bool,
    config: &CompressionConfig,
) -> Vec<OsString> {
    let dpi = config.image_resolution;
    let mut args: Vec<OsString> = vec![
        "-sDEVICE=pdfwrite".into(),
        format!("-dCompatibilityLevel={}", config.compatibility_level).into(),
        "-dPDFSETTINGS=/screen".into(),
        "-dNOPAUSE".into(),
        "-dQUIET".into(),
        "-dBATCH".into(),
        "-dAutoRotatePages=/None".into(),
        "-dColorImageDownsampleType=/Bicubic".into(),
        format!("-dColorImageResolution={dpi}").into(),
        "-dGrayImageDownsampleType=/Bicubic".into(),
        format!("-dGrayImageResolution={dpi}").into(),
        "-dMonoImageDownsampleType=/Bicubic".into(),
        format!("-dMonoImageResolution={dpi}").into(),
    ];
    if grayscale {
        args.splice(
            3..3,
            [
                OsString::from("-sColorConversionStrategy=Gray"),
                OsString::from("-dProcessColorModel=/DeviceGray"),
            ],
        );
    }
    let mut output_arg = OsString::from("-sOutputFile=");
    output_arg.push(output.as_os_str());
    args.push(output_arg);
    args.push(input.as_os_str().to_os_string());
    args
}

fn run_stage(
    runner: &dyn ToolRunner,
    stage: Stage,
    tool: &str,
    args: &[OsString],
) -> Result<ToolOutput, ShrinkError> {
    debug!(
        "{stage}: {tool} {}",
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = runner
        .run(tool, args)
        .map_err(|source| ShrinkError::ToolLaunchFailed {
            stage,
            tool: tool.to_string(),
            source,
        })?;

    let stderr = output.stderr_text();
    if !output.success() {
        return Err(ShrinkError::ToolFailed {
            stage,
            tool: tool.to_string(),
            status: output.status,
            stderr,
        });
    }
    if !stderr.is_empty() {
        warn!("{stage}: {tool} reported: {stderr}");
    }
    Ok(output)
}

/// Size of a stage's output file, which must exist and be non-empty.
fn check_output(stage: Stage, tool: &str, path: &Path) -> Result<u64, ShrinkError> {
    let invalid = |detail: &str| ShrinkError::InvalidStageOutput {
        stage,
        tool: tool.to_string(),
        detail: detail.to_string(),
    };
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => Err(invalid("output file is empty")),
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(invalid("output file was not created"))
        }
        Err(e) => Err(ShrinkError::io(stage, path, e)),
    }
}
