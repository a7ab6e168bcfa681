//! CLI binary for edgequake-shrink.
//!
//! A thin shim over the library crate: every input file becomes one request
//! to the [`JobFacade`], and every successful response is written next to
//! its input (or where `--output` / `--output-dir` say).

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_shrink::{
    CompressionConfig, CompressionProgressCallback, CompressionStats, DocumentFormat, Endpoint,
    JobFacade, JobRequest, JobResponse, PdfStrategy, ProgressCallback, Stage, Staging, Upload, Uuid,
    DEFAULT_MAX_OUTPUT_BYTES,
};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch; jobs finish out of order, so per-file lines
/// are printed by the caller above the bar.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Shrinking");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl CompressionProgressCallback for CliProgressCallback {
    fn on_job_start(&self, _job: Uuid, format: DocumentFormat, input_len: usize) {
        self.bar
            .set_message(format!("{format} {}", human_bytes(input_len as u64)));
    }

    fn on_quality_attempt(&self, _job: Uuid, quality: u8, size: usize) {
        self.bar
            .set_message(format!("quality {quality} → {}", human_bytes(size as u64)));
    }

    fn on_stage_complete(&self, _job: Uuid, stage: Stage, _elapsed: Duration) {
        self.bar.set_message(format!("{stage} done"));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Shrink a photo next to the original (photo-min.jpg)
  shrink photo.jpg

  # Shrink a scanned PDF to grayscale into a given file
  shrink --grayscale scan.pdf -o scan-small.pdf

  # A whole folder, four files at a time, into out/
  shrink -c 4 -d out/ *.png *.pdf

  # No qpdf/Ghostscript installed: in-process PDF strategy
  shrink --strategy library report.pdf

  # Machine-readable report
  shrink --json *.webp > report.json

EXTERNAL TOOLS (default PDF strategy):
  qpdf          structural normalisation (--stream-data=uncompress)
  gs            Ghostscript pdfwrite, /screen preset, 72 dpi downsampling

ENVIRONMENT VARIABLES:
  RUST_LOG      Override log filter (e.g. edgequake_shrink=debug)
  SHRINK_*      Every flag can be set through its SHRINK_ variable
"#;

/// Shrink images and PDFs while keeping their format.
#[derive(Parser, Debug)]
#[command(
    name = "shrink",
    version,
    about = "Shrink JPEG, PNG, WebP and PDF files",
    long_about = "Shrink raster images by searching for the lowest encoder quality that still \
pays off, and PDFs by running them through qpdf and Ghostscript (or an in-process rewrite). \
Outputs keep their input format and are never larger than the configured ceiling.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to shrink (.jpg, .jpeg, .png, .webp, .pdf).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output file (single input only).
    #[arg(short, long, env = "SHRINK_OUTPUT")]
    output: Option<PathBuf>,

    /// Directory for outputs. Default: next to each input.
    #[arg(short = 'd', long, env = "SHRINK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Appended to the input's file stem to name the output.
    #[arg(long, env = "SHRINK_SUFFIX", default_value = "-min")]
    suffix: String,

    /// Convert PDFs to grayscale.
    #[arg(short, long, env = "SHRINK_GRAYSCALE")]
    grayscale: bool,

    /// PDF pipeline: external (qpdf + Ghostscript) or library (in-process).
    #[arg(long, env = "SHRINK_PDF_STRATEGY", value_enum, default_value = "external")]
    strategy: StrategyArg,

    /// qpdf executable.
    #[arg(long, env = "SHRINK_QPDF", default_value = "qpdf")]
    qpdf: String,

    /// Ghostscript executable.
    #[arg(long, env = "SHRINK_GS", default_value = "gs")]
    gs: String,

    /// Image downsample resolution for PDFs, in dpi.
    #[arg(long, env = "SHRINK_RESOLUTION", default_value_t = 72,
          value_parser = clap::value_parser!(u32).range(9..=1200))]
    resolution: u32,

    /// Reject outputs larger than this many bytes.
    #[arg(long, env = "SHRINK_MAX_SIZE", default_value_t = DEFAULT_MAX_OUTPUT_BYTES)]
    max_size: u64,

    /// Downscale images whose longest edge exceeds this many pixels.
    #[arg(long, env = "SHRINK_MAX_DIMENSION")]
    max_dimension: Option<u32>,

    /// Staging directory for intermediate files. Default: a private temp dir.
    #[arg(long, env = "SHRINK_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Number of files processed at once.
    #[arg(short, long, env = "SHRINK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Print a JSON report instead of a summary.
    #[arg(long, env = "SHRINK_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "SHRINK_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SHRINK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SHRINK_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    External,
    Library,
}

impl From<StrategyArg> for PdfStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::External => PdfStrategy::External,
            StrategyArg::Library => PdfStrategy::Library,
        }
    }
}

/// Outcome for one input file.
#[derive(Debug, Serialize)]
struct FileReport {
    input: PathBuf,
    output: Option<PathBuf>,
    status: u16,
    error: Option<String>,
    stats: Option<CompressionStats>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output takes a single input; use --output-dir for several");
    }

    let progress = show_progress.then(|| CliProgressCallback::new(cli.inputs.len()));
    let config = build_config(&cli, progress.clone().map(|p| p as ProgressCallback))?;

    let staging = match &cli.work_dir {
        Some(dir) => Staging::bootstrap(dir)
            .with_context(|| format!("Failed to prepare work dir {}", dir.display()))?,
        None => Staging::temporary().context("Failed to create a temporary work dir")?,
    };
    let facade = JobFacade::new(staging, config);

    // ── Run jobs ─────────────────────────────────────────────────────────
    let jobs: Vec<(PathBuf, PathBuf)> = cli
        .inputs
        .iter()
        .map(|input| (input.clone(), output_path(&cli, input)))
        .collect();

    let reports: Vec<FileReport> = stream::iter(jobs.into_iter().map(|(input, output)| {
        let facade = &facade;
        let progress = progress.clone();
        let grayscale = cli.grayscale;
        async move {
            let report = shrink_one(facade, &input, &output, grayscale)
                .await
                .unwrap_or_else(|e| FileReport {
                    input: input.clone(),
                    output: None,
                    status: 0,
                    error: Some(format!("{e:#}")),
                    stats: None,
                });
            if let Some(cb) = &progress {
                cb.bar.println(report_line(&report));
                cb.bar.inc(1);
            }
            report
        }
    }))
    .buffer_unordered(cli.concurrency.max(1))
    .collect()
    .await;

    if let Some(cb) = &progress {
        cb.bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let failed = reports.iter().filter(|r| r.error.is_some()).count();
    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        if progress.is_none() {
            for report in &reports {
                eprintln!("{}", report_line(report));
            }
        }
        let saved: u64 = reports
            .iter()
            .filter_map(|r| r.stats.as_ref())
            .map(|s| s.input_bytes.saturating_sub(s.output_bytes))
            .sum();
        eprintln!(
            "{} {}/{} files shrunk, {} saved",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(reports.len() - failed).to_string()),
            reports.len(),
            bold(&human_bytes(saved)),
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed", reports.len());
    }
    Ok(())
}

/// Map CLI args to `CompressionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<CompressionConfig> {
    let mut builder = CompressionConfig::builder()
        .max_output_bytes(cli.max_size)
        .pdf_strategy(cli.strategy.into())
        .preprocess_tool(cli.qpdf.clone())
        .render_tool(cli.gs.clone())
        .image_resolution(cli.resolution);

    if let Some(px) = cli.max_dimension {
        builder = builder.max_dimension(px);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Send one file through the façade and write a successful response.
async fn shrink_one(
    facade: &JobFacade,
    input: &Path,
    output: &Path,
    grayscale: bool,
) -> Result<FileReport> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let filename = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut request = JobRequest::new(Upload::from_bytes(filename, bytes));
    if grayscale {
        request = request.with_field("grayscale", "true");
    }

    let response = facade.handle(Endpoint::Any, request).await;
    if !response.is_success() {
        return Ok(FileReport {
            input: input.to_path_buf(),
            output: None,
            status: response.status,
            error: Some(String::from_utf8_lossy(&response.body).into_owned()),
            stats: None,
        });
    }

    let status = response.status;
    let stats = response.stats.clone();
    let target = output.to_path_buf();
    tokio::task::spawn_blocking(move || write_response(&target, response))
        .await
        .context("Writer task panicked")??;

    Ok(FileReport {
        input: input.to_path_buf(),
        output: Some(output.to_path_buf()),
        status,
        error: None,
        stats,
    })
}

/// Atomic write: transmit into a temp file beside `path`, then rename.
fn write_response(path: &Path, response: JobResponse) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    if let Err(e) = response.transmit(&mut writer) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Failed to write {}", tmp_path.display()));
    }
    drop(writer);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move output to {}", path.display()))
}

/// `<dir>/<stem><suffix>.<ext>`, or `--output` verbatim.
fn output_path(cli: &Cli, input: &Path) -> PathBuf {
    if let Some(output) = &cli.output {
        return output.clone();
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{stem}{}.{}", cli.suffix, ext.to_string_lossy()),
        None => format!("{stem}{}", cli.suffix),
    };
    let dir = match &cli.output_dir {
        Some(dir) => dir.clone(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(name)
}

fn report_line(report: &FileReport) -> String {
    let input = report.input.display().to_string();
    match (&report.error, &report.stats) {
        (Some(error), _) => format!("  {} {}  {}", red("✗"), input, red(error)),
        (None, Some(stats)) => format!(
            "  {} {}  {} → {}  {}",
            green("✓"),
            input,
            human_bytes(stats.input_bytes),
            human_bytes(stats.output_bytes),
            dim(&format!(
                "{:.0}%  {}ms",
                stats.ratio() * 100.0,
                stats.total_duration_ms
            )),
        ),
        (None, None) => format!("  {} {}", green("✓"), input),
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("shrink").chain(args.iter().copied()))
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let cli = cli(&["photos/cat.jpeg"]);
        assert_eq!(
            output_path(&cli, Path::new("photos/cat.jpeg")),
            PathBuf::from("photos/cat-min.jpeg")
        );
    }

    #[test]
    fn output_dir_and_suffix_apply() {
        let cli = cli(&["-d", "out", "--suffix", ".small", "a/doc.pdf"]);
        assert_eq!(
            output_path(&cli, Path::new("a/doc.pdf")),
            PathBuf::from("out/doc.small.pdf")
        );
    }

    #[test]
    fn strategy_flag_maps_to_config() {
        let cli = cli(&["--strategy", "library", "--max-size", "1000", "x.pdf"]);
        let config = build_config(&cli, None).unwrap();
        assert_eq!(config.pdf_strategy, PdfStrategy::Library);
        assert_eq!(config.max_output_bytes, 1000);
    }

    #[test]
    fn human_bytes_scales() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
