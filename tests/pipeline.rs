//! End-to-end tests through the job façade.
//!
//! External PDF tools are replaced by a scripted [`ToolRunner`] so these run
//! anywhere; image and in-process PDF jobs use the real codecs.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use edgequake_shrink::{
    CompressionConfig, Endpoint, ErrorKind, JobFacade, JobRequest, PdfStrategy, Staging,
    ToolOutput, ToolRunner, Upload,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::ffi::OsString;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const RENDERED: &[u8] = b"%PDF-1.4\n% rendered\n%%EOF\n";

/// Stands in for qpdf and gs. qpdf copies its input to its output, gs
/// writes `render_output` to its `-sOutputFile=` path.
#[derive(Default)]
struct ScriptedTools {
    calls: Mutex<Vec<(String, Vec<String>)>>,
    render_missing: bool,
    render_output: Option<Vec<u8>>,
    /// Removed while qpdf runs, to show later stages never read it.
    remove_during_preprocess: Option<PathBuf>,
}

impl ScriptedTools {
    fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolRunner for ScriptedTools {
    fn run(&self, program: &str, args: &[OsString]) -> io::Result<ToolOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.clone()));

        match program {
            "qpdf" => {
                if let Some(path) = &self.remove_during_preprocess {
                    let _ = std::fs::remove_file(path);
                }
                std::fs::copy(&args[1], &args[2])?;
                Ok(ToolOutput {
                    status: Some(0),
                    ..Default::default()
                })
            }
            "gs" if self.render_missing => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )),
            "gs" => {
                let out = args
                    .iter()
                    .find_map(|a| a.strip_prefix("-sOutputFile="))
                    .expect("gs called without -sOutputFile");
                let body = self.render_output.clone().unwrap_or_else(|| RENDERED.to_vec());
                std::fs::write(out, body)?;
                Ok(ToolOutput {
                    status: Some(0),
                    ..Default::default()
                })
            }
            other => Err(io::Error::new(io::ErrorKind::NotFound, other.to_string())),
        }
    }
}

struct Harness {
    dir: tempfile::TempDir,
    facade: JobFacade,
    tools: Arc<ScriptedTools>,
}

impl Harness {
    fn new(tools: ScriptedTools) -> Self {
        Self::with_config(tools, |b| b)
    }

    fn with_config(
        tools: ScriptedTools,
        tweak: impl FnOnce(edgequake_shrink::CompressionConfigBuilder) -> edgequake_shrink::CompressionConfigBuilder,
    ) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::bootstrap(dir.path().join("staging")).unwrap();
        let tools = Arc::new(tools);
        let config = tweak(CompressionConfig::builder().tool_runner(tools.clone()))
            .build()
            .unwrap();
        Self {
            dir,
            facade: JobFacade::new(staging, config),
            tools,
        }
    }

    fn staged_files(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.facade.staging().root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}

fn noisy_jpeg() -> Vec<u8> {
    let mut seed = 0x2545_f491_u32;
    let img = RgbImage::from_fn(96, 96, |x, y| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let n = (seed % 48) as u8;
        Rgb([(x * 2) as u8 + n, (y * 2) as u8 + n, 120 + n])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

/// One page with a red square: enough for the in-process strategy.
fn sample_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content = Content {
        operations: vec![
            Operation::new("rg", vec![1.into(), 0.into(), 0.into()]),
            Operation::new("re", vec![10.into(), 10.into(), 100.into(), 100.into()]),
            Operation::new("f", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn write_upload(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn jpeg_upload_is_searched_and_returned() {
    let harness = Harness::new(ScriptedTools::default());
    let input = noisy_jpeg();

    let response = harness
        .facade
        .handle(
            Endpoint::Image,
            JobRequest::new(Upload::from_bytes("holiday.jpg", input.clone())),
        )
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "image/jpeg");
    assert_eq!(
        response.attachment_filename.as_deref(),
        Some(format!("{}-output.jpg", response.job_id).as_str())
    );
    assert!(response.body.len() <= input.len());
    assert!(response.body.starts_with(&[0xFF, 0xD8]));

    let stats = response.stats.as_ref().unwrap();
    let qualities: Vec<u8> = stats.attempts.iter().map(|a| a.quality).collect();
    assert_eq!(qualities[0], 80);
    assert!(qualities.windows(2).all(|w| w[0] == w[1] + 10));
    assert!(qualities.len() <= 8);
    // Every attempt but the one that ended the search got smaller.
    let sizes: Vec<usize> = stats.attempts.iter().map(|a| a.size).collect();
    if sizes.len() > 2 {
        assert!(sizes[..sizes.len() - 1].windows(2).all(|w| w[1] < w[0]));
    }

    assert!(harness.tools.calls().is_empty());
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn unsupported_extension_is_rejected() {
    let harness = Harness::new(ScriptedTools::default());
    let response = harness
        .facade
        .handle(
            Endpoint::Any,
            JobRequest::new(Upload::from_bytes("scan.bmp", b"BM\0\0".to_vec())),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.error_kind, Some(ErrorKind::UnsupportedFormat));
    assert_eq!(response.body, b"Unsupported file format.");
    assert!(response.attachment_filename.is_none());
}

#[tokio::test]
async fn image_over_ceiling_uses_image_reason() {
    let harness = Harness::with_config(ScriptedTools::default(), |b| b.max_output_bytes(64));
    let response = harness
        .facade
        .handle(
            Endpoint::Image,
            JobRequest::new(Upload::from_bytes("holiday.jpeg", noisy_jpeg())),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.body, b"Cannot compress image to the desired size.");
}

// ── PDFs through external tools ──────────────────────────────────────────────

#[tokio::test]
async fn pdf_upload_runs_both_tools_and_transmit_cleans_up() {
    let harness = Harness::new(ScriptedTools::default());
    let response = harness
        .facade
        .handle(
            Endpoint::Pdf,
            JobRequest::new(Upload::from_bytes("report.pdf", sample_pdf())),
        )
        .await;

    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, "application/pdf");
    assert_eq!(response.body, RENDERED);
    assert_eq!(
        response.content_disposition(),
        Some(format!(
            "attachment; filename=\"{}-output.pdf\"",
            response.job_id
        ))
    );

    let programs: Vec<String> = harness.tools.calls().into_iter().map(|(p, _)| p).collect();
    assert_eq!(programs, vec!["qpdf", "gs"]);

    // Only the delivered output survives the job, until it is transmitted.
    assert!(response.holds_artifact());
    assert_eq!(harness.staged_files().len(), 1);

    let mut sink = Vec::new();
    response.transmit(&mut sink).unwrap();
    assert_eq!(sink, RENDERED);
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn oversized_render_is_rejected_without_residue() {
    let tools = ScriptedTools {
        render_output: Some([b"%PDF-1.4\n".as_slice(), &[b'x'; 4096]].concat()),
        ..Default::default()
    };
    let harness = Harness::with_config(tools, |b| b.max_output_bytes(1024));
    let response = harness
        .facade
        .handle(
            Endpoint::Pdf,
            JobRequest::new(Upload::from_bytes("big.pdf", sample_pdf())),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.error_kind, Some(ErrorKind::SizeLimitExceeded));
    assert_eq!(response.body, b"Cannot compress PDF to the desired size.");
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn missing_render_tool_is_500_and_cleans_up() {
    let tools = ScriptedTools {
        render_missing: true,
        ..Default::default()
    };
    let harness = Harness::new(tools);
    let upload = write_upload(harness.facade.staging().root(), "upload-1", &sample_pdf());

    let response = harness
        .facade
        .handle(
            Endpoint::Pdf,
            JobRequest::new(Upload::from_temp_file("report.pdf", &upload)),
        )
        .await;

    assert_eq!(response.status, 500);
    assert_eq!(response.error_kind, Some(ErrorKind::ToolLaunchFailed));
    assert_eq!(response.body, b"PDF tooling is unavailable.");
    assert!(!upload.exists());
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn adopted_upload_may_vanish_after_normalize() {
    let harness_dir = tempfile::tempdir().unwrap();
    let upload = write_upload(harness_dir.path(), "upload-2", &sample_pdf());
    let tools = ScriptedTools {
        remove_during_preprocess: Some(upload.clone()),
        ..Default::default()
    };
    let harness = Harness::new(tools);

    let response = harness
        .facade
        .handle(
            Endpoint::Pdf,
            JobRequest::new(Upload::from_temp_file("report.pdf", &upload)),
        )
        .await;

    assert_eq!(response.status, 200);
    assert!(!upload.exists());
    drop(response);
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn rejected_temp_upload_is_released() {
    let harness = Harness::new(ScriptedTools::default());
    let upload = write_upload(harness.dir.path(), "upload-3", b"not a pdf at all");

    let response = harness
        .facade
        .handle(
            Endpoint::Pdf,
            JobRequest::new(Upload::from_temp_file("fake.pdf", &upload)),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.error_kind, Some(ErrorKind::CorruptInput));
    assert!(!upload.exists());
    assert!(harness.tools.calls().is_empty());
}

#[tokio::test]
async fn grayscale_field_reaches_ghostscript() {
    let harness = Harness::new(ScriptedTools::default());
    let request = JobRequest::new(Upload::from_bytes("scan.pdf", sample_pdf()))
        .with_field("grayscale", "true");

    let response = harness.facade.handle(Endpoint::Pdf, request).await;
    assert_eq!(response.status, 200);

    let calls = harness.tools.calls();
    let (_, gs_args) = calls.iter().find(|(p, _)| p == "gs").unwrap();
    assert!(gs_args.iter().any(|a| a == "-sColorConversionStrategy=Gray"));
    assert!(gs_args.iter().any(|a| a == "-dProcessColorModel=/DeviceGray"));
}

#[tokio::test]
async fn pdf_on_image_endpoint_is_unsupported() {
    let harness = Harness::new(ScriptedTools::default());
    let response = harness
        .facade
        .handle(
            Endpoint::Image,
            JobRequest::new(Upload::from_bytes("report.pdf", sample_pdf())),
        )
        .await;

    assert_eq!(response.status, 400);
    assert_eq!(response.error_kind, Some(ErrorKind::UnsupportedFormat));
}

// ── PDFs in process ──────────────────────────────────────────────────────────

#[tokio::test]
async fn library_strategy_needs_no_tools() {
    let harness = Harness::with_config(ScriptedTools::default(), |b| {
        b.pdf_strategy(PdfStrategy::Library)
    });
    let request = JobRequest::new(Upload::from_bytes("scan.pdf", sample_pdf()))
        .with_field("grayscale", "true");

    let response = harness.facade.handle(Endpoint::Pdf, request).await;

    assert_eq!(response.status, 200);
    assert!(response.body.starts_with(b"%PDF"));
    assert!(!response.holds_artifact());
    assert!(harness.tools.calls().is_empty());
    assert_eq!(
        response.stats.as_ref().and_then(|s| s.strategy),
        Some(PdfStrategy::Library)
    );

    let doc = Document::load_mem(&response.body).unwrap();
    let page = *doc.get_pages().values().next().unwrap();
    let ops = doc.get_and_decode_page_content(page).unwrap().operations;
    assert!(ops.iter().any(|op| op.operator == "g"));
    assert!(!ops.iter().any(|op| op.operator == "rg"));
    assert!(harness.staged_files().is_empty());
}

#[tokio::test]
async fn concurrent_jobs_get_distinct_ids() {
    let harness = Harness::new(ScriptedTools::default());
    let requests = (0..4).map(|i| {
        let facade = &harness.facade;
        async move {
            facade
                .handle(
                    Endpoint::Any,
                    JobRequest::new(Upload::from_bytes(format!("doc-{i}.pdf"), sample_pdf())),
                )
                .await
        }
    });
    let responses = futures::future::join_all(requests).await;

    let mut ids: Vec<_> = responses.iter().map(|r| r.job_id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert!(responses.iter().all(|r| r.status == 200));

    drop(responses);
    assert!(harness.staged_files().is_empty());
}
