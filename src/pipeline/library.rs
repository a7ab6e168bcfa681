//! `PdfStrategy::Library`: shrink a PDF in-process on the `lopdf` document model.
//!
//! No external tools are involved and nothing touches the staging
//! directory; the whole document lives in memory.
//!
//! ## Grayscale conversion
//!
//! Colors are converted where they are defined rather than by rasterising:
//!
//! | Source | Rewrite |
//! |--------|---------|
//! | `r g b rg` / `RG` | `gray g` / `G` |
//! | `c m y k k` / `K` | `gray g` / `G` |
//! | `/DeviceRGB cs` / `CS` (and CMYK) | `/DeviceGray cs` / `CS` |
//! | `sc`/`scn`/`SC`/`SCN` after a converted color space | single gray operand |
//! | 8-bit RGB/CMYK image XObject, raw or Flate | gray samples, recompressed on save |
//! | 8-bit RGB/CMYK image XObject, DCT | decoded and re-encoded as gray JPEG |
//!
//! Page and form content streams are both rewritten. Named color spaces
//! other than `DeviceRGB`, `DeviceCMYK` and RGB/CMYK `ICCBased` profiles
//! (`Indexed`, `Separation`, patterns, shadings) are left untouched.

use super::{PdfOutcome, StageTimer};
use crate::config::CompressionConfig;
use crate::error::{ShrinkError, Stage};
use crate::format::DocumentFormat;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DEVICE_GRAY: &[u8] = b"DeviceGray";

/// What the grayscale pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecolorReport {
    pub pages: usize,
    pub forms: usize,
    pub operators: usize,
    pub images: usize,
}

/// Run the in-process pipeline on `input`.
pub fn compress(
    input: &[u8],
    grayscale: bool,
    config: &CompressionConfig,
    job: Uuid,
) -> Result<PdfOutcome, ShrinkError> {
    let mut timer = StageTimer::new(job, &config.progress_callback);

    let mut doc = Document::load_mem(input).map_err(|e| ShrinkError::CorruptInput {
        stage: Stage::Load,
        detail: e.to_string(),
    })?;
    info!("Job {job}: loaded PDF with {} pages", doc.get_pages().len());
    timer.finish(Stage::Load);

    if grayscale {
        let report = recolor_document(&mut doc, config.library_jpeg_quality)?;
        info!(
            "Job {job}: grayscale rewrote {} operators on {} pages and {} forms, {} images",
            report.operators, report.pages, report.forms, report.images
        );
        timer.finish(Stage::Recolor);
    }

    doc.compress();
    let mut bytes = Vec::with_capacity(input.len());
    doc.save_to(&mut bytes)
        .map_err(|e| ShrinkError::DocumentModel {
            stage: Stage::Save,
            detail: e.to_string(),
        })?;
    timer.finish(Stage::Save);

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

    info!("Job {job}: PDF {} → {} bytes in-process", input.len(), size);
    Ok(PdfOutcome {
        bytes,
        artifact: None,
        stages: timer.into_timings(),
    })
}

/// Convert every page, form and supported image in `doc` to `DeviceGray`.
pub fn recolor_document(doc: &mut Document, jpeg_quality: u8) -> Result<RecolorReport, ShrinkError> {
    let mut report = RecolorReport::default();

    let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for page_id in page_ids {
        let content = match doc.get_and_decode_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping page {:?}: content stream not parseable: {}", page_id, e);
                continue;
            }
        };
        let (operations, changed) = recolor_operations(content.operations);
        if changed > 0 {
            let encoded = encode_content(operations)?;
            doc.change_page_content(page_id, encoded)
                .map_err(|e| ShrinkError::DocumentModel {
                    stage: Stage::Recolor,
                    detail: e.to_string(),
                })?;
        }
        report.pages += 1;
        report.operators += changed;
    }

    // Collect first: ICCBased color spaces are resolved through the document.
    let mut forms = Vec::new();
    let mut images = Vec::new();
    for (id, object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        match name_of(&stream.dict, b"Subtype") {
            Some(b"Form") => forms.push(*id),
            Some(b"Image") => {
                if let Some(components) = image_components(doc, &stream.dict) {
                    images.push((*id, components));
                }
            }
            _ => {}
        }
    }

    for id in forms {
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
            let changed = recolor_form(stream)?;
            if changed > 0 {
                report.forms += 1;
                report.operators += changed;
            }
        }
    }

    for (id, components) in images {
        if let Ok(Object::Stream(stream)) = doc.get_object_mut(id) {
            if convert_image(stream, components, jpeg_quality) {
                report.images += 1;
            } else {
                debug!("Image {:?} left in color", id);
            }
        }
    }

    Ok(report)
}

/// Rewrite color operators to `DeviceGray`, returning the new operations and
/// how many were changed.
pub fn recolor_operations(operations: Vec<Operation>) -> (Vec<Operation>, usize) {
    let mut changed = 0;
    let mut fill_converted = false;
    let mut stroke_converted = false;
    let mut out = Vec::with_capacity(operations.len());

    for op in operations {
        let operator = op.operator.clone();
        let replacement = match operator.as_str() {
            "rg" | "RG" => rgb_gray(&op.operands).map(|g| gray_op(&operator, g)),
            "k" | "K" => cmyk_gray(&op.operands).map(|g| gray_op(&operator, g)),
            "cs" | "CS" => {
                let convertible = matches!(
                    op.operands.first(),
                    Some(Object::Name(n)) if n == b"DeviceRGB" || n == b"DeviceCMYK"
                );
                if operator == "cs" {
                    fill_converted = convertible;
                } else {
                    stroke_converted = convertible;
                }
                convertible.then(|| Operation::new(&operator, vec![Object::Name(DEVICE_GRAY.to_vec())]))
            }
            "sc" | "scn" if fill_converted => components_gray(&op.operands)
                .map(|g| Operation::new(&operator, vec![real(g)])),
            "SC" | "SCN" if stroke_converted => components_gray(&op.operands)
                .map(|g| Operation::new(&operator, vec![real(g)])),
            _ => None,
        };
        match replacement {
            Some(new_op) => {
                changed += 1;
                out.push(new_op);
            }
            None => out.push(op),
        }
    }

    (out, changed)
}

fn recolor_form(stream: &mut Stream) -> Result<usize, ShrinkError> {
    let data = if stream.dict.has(b"Filter") {
        match stream.decompressed_content() {
            Ok(data) => data,
            Err(e) => {
                warn!("Skipping form XObject with undecodable stream: {}", e);
                return Ok(0);
            }
        }
    } else {
        stream.content.clone()
    };
    let content = match Content::decode(&data) {
        Ok(content) => content,
        Err(e) => {
            warn!("Skipping form XObject: content not parseable: {}", e);
            return Ok(0);
        }
    };
    let (operations, changed) = recolor_operations(content.operations);
    if changed > 0 {
        stream.set_plain_content(encode_content(operations)?);
    }
    Ok(changed)
}

/// Replace an RGB (3) or CMYK (4) image's samples with gray ones.
///
/// Returns `false` when the encoding is not one we can rewrite.
fn convert_image(stream: &mut Stream, components: usize, jpeg_quality: u8) -> bool {
    if !matches!(stream.dict.get(b"BitsPerComponent"), Ok(Object::Integer(8))) {
        return false;
    }
    let (Some(width), Some(height)) = (
        integer_of(&stream.dict, b"Width"),
        integer_of(&stream.dict, b"Height"),
    ) else {
        return false;
    };

    let filters = filters_of(&stream.dict);
    let converted = match filters.as_slice() {
        [f] if f == b"DCTDecode" => gray_jpeg(&stream.content, width, height, jpeg_quality)
            .map(|jpeg| stream.set_content(jpeg)),
        [] | [_] if filters.iter().all(|f| f == b"FlateDecode") => {
            let samples = if filters.is_empty() {
                Some(stream.content.clone())
            } else {
                stream.decompressed_content().ok()
            };
            samples
                .and_then(|s| gray_samples(&s, components, width * height))
                .map(|gray| stream.set_plain_content(gray))
        }
        _ => None,
    };

    if converted.is_none() {
        return false;
    }
    stream.dict.set("ColorSpace", Object::Name(DEVICE_GRAY.to_vec()));
    stream.dict.remove(b"Decode");
    true
}

fn gray_jpeg(data: &[u8], width: usize, height: usize, quality: u8) -> Option<Vec<u8>> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg).ok()?;
    if img.width() as usize != width || img.height() as usize != height {
        return None;
    }
    let gray = DynamicImage::ImageLuma8(img.to_luma8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality.clamp(1, 100));
    gray.write_with_encoder(encoder).ok()?;
    Some(buf)
}

/// Interleaved 8-bit RGB or CMYK samples to one gray byte per pixel.
fn gray_samples(samples: &[u8], components: usize, pixels: usize) -> Option<Vec<u8>> {
    if samples.len() < pixels * components {
        return None;
    }
    let gray = samples
        .chunks_exact(components)
        .take(pixels)
        .map(|px| match *px {
            [r, g, b] => luminance(r as u32, g as u32, b as u32),
            [c, m, y, k] => {
                let ink = (c as u32 * 30 + m as u32 * 59 + y as u32 * 11) / 100 + k as u32;
                255 - ink.min(255) as u8
            }
            _ => 0,
        })
        .collect();
    Some(gray)
}

fn luminance(r: u32, g: u32, b: u32) -> u8 {
    ((r * 299 + g * 587 + b * 114 + 500) / 1000) as u8
}

fn rgb_gray(operands: &[Object]) -> Option<f32> {
    match operands {
        [r, g, b] => Some(0.299 * number(r)? + 0.587 * number(g)? + 0.114 * number(b)?),
        _ => None,
    }
}

fn cmyk_gray(operands: &[Object]) -> Option<f32> {
    match operands {
        [c, m, y, k] => {
            let ink = 0.30 * number(c)? + 0.59 * number(m)? + 0.11 * number(y)? + number(k)?;
            Some(1.0 - ink.min(1.0))
        }
        _ => None,
    }
}

/// `sc`/`scn` operands under a converted color space: 3 (RGB) or 4 (CMYK).
fn components_gray(operands: &[Object]) -> Option<f32> {
    match operands.len() {
        3 => rgb_gray(operands),
        4 => cmyk_gray(operands),
        _ => None,
    }
}

fn gray_op(operator: &str, gray: f32) -> Operation {
    let name = if operator.chars().all(|c| c.is_ascii_lowercase()) { "g" } else { "G" };
    Operation::new(name, vec![real(gray)])
}

fn real(value: f32) -> Object {
    let rounded = (value.clamp(0.0, 1.0) * 1000.0).round() / 1000.0;
    Object::Real(rounded.into())
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn name_of<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}

fn integer_of(dict: &Dictionary, key: &[u8]) -> Option<usize> {
    match dict.get(key) {
        Ok(Object::Integer(i)) if *i > 0 => Some(*i as usize),
        _ => None,
    }
}

fn filters_of(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Component count of an image's color space when it is RGB or CMYK.
fn image_components(doc: &Document, dict: &Dictionary) -> Option<usize> {
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return None;
    }
    match dict.get(b"ColorSpace").ok()? {
        Object::Name(name) => device_components(name),
        Object::Array(items) => match items.as_slice() {
            [Object::Name(family), Object::Reference(profile)] if family == b"ICCBased" => {
                match doc.get_object(*profile).ok()? {
                    Object::Stream(icc) => match icc.dict.get(b"N") {
                        Ok(Object::Integer(n)) if *n == 3 || *n == 4 => Some(*n as usize),
                        _ => None,
                    },
                    _ => None,
                }
            }
            _ => None,
        },
        _ => None,
    }
}

fn device_components(name: &[u8]) -> Option<usize> {
    match name {
        b"DeviceRGB" => Some(3),
        b"DeviceCMYK" => Some(4),
        _ => None,
    }
}

fn encode_content(operations: Vec<Operation>) -> Result<Vec<u8>, ShrinkError> {
    Content { operations }
        .encode()
        .map_err(|e| ShrinkError::DocumentModel {
            stage: Stage::Recolor,
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use lopdf::dictionary;

    fn int(v: i64) -> Object {
        Object::Integer(v)
    }

    fn operators(ops: &[Operation]) -> Vec<&str> {
        ops.iter().map(|o| o.operator.as_str()).collect()
    }

    fn gray_value(op: &Operation) -> f32 {
        number(&op.operands[0]).unwrap()
    }

    fn is_name(object: &Object, expected: &[u8]) -> bool {
        matches!(object, Object::Name(n) if n.as_slice() == expected)
    }

    fn plain_content(stream: &Stream) -> Vec<u8> {
        if stream.dict.has(b"Filter") {
            stream.decompressed_content().unwrap()
        } else {
            stream.content.clone()
        }
    }

    /// One Letter page drawing a red rectangle and a 2×1 RGB image.
    fn sample_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => int(2),
                "Height" => int(1),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => int(8),
            },
            vec![255, 0, 0, 0, 0, 255],
        ));

        let content = Content {
            operations: vec![
                Operation::new("rg", vec![int(1), int(0), int(0)]),
                Operation::new("re", vec![int(10), int(10), int(100), int(100)]),
                Operation::new("f", vec![]),
                Operation::new("q", vec![]),
                Operation::new("cm", vec![int(50), int(0), int(0), int(25), int(200), int(200)]),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![int(0), int(0), int(612), int(792)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => int(1),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn rg_and_k_become_gray() {
        let (ops, changed) = recolor_operations(vec![
            Operation::new("rg", vec![int(1), int(0), int(0)]),
            Operation::new("RG", vec![int(0), int(0), int(1)]),
            Operation::new("k", vec![int(0), int(0), int(0), int(1)]),
            Operation::new("re", vec![int(0), int(0), int(1), int(1)]),
        ]);
        assert_eq!(changed, 3);
        assert_eq!(operators(&ops), vec!["g", "G", "g", "re"]);
        assert!((gray_value(&ops[0]) - 0.299).abs() < 1e-3);
        assert!((gray_value(&ops[1]) - 0.114).abs() < 1e-3);
        assert_eq!(gray_value(&ops[2]), 0.0);
    }

    #[test]
    fn sc_follows_converted_color_space_only() {
        let (ops, changed) = recolor_operations(vec![
            Operation::new("cs", vec![Object::Name(b"DeviceRGB".to_vec())]),
            Operation::new("sc", vec![int(0), int(1), int(0)]),
            Operation::new("cs", vec![Object::Name(b"Pattern".to_vec())]),
            Operation::new("scn", vec![Object::Name(b"P1".to_vec())]),
            Operation::new("CS", vec![Object::Name(b"DeviceCMYK".to_vec())]),
            Operation::new("SCN", vec![int(0), int(0), int(0), int(0)]),
        ]);
        assert_eq!(changed, 4);
        assert!(is_name(&ops[0].operands[0], b"DeviceGray"));
        assert!((gray_value(&ops[1]) - 0.587).abs() < 1e-3);
        assert!(is_name(&ops[2].operands[0], b"Pattern"));
        assert!(is_name(&ops[3].operands[0], b"P1"));
        assert!(is_name(&ops[4].operands[0], b"DeviceGray"));
        assert_eq!(gray_value(&ops[5]), 1.0);
    }

    #[test]
    fn malformed_color_operands_are_kept() {
        let (ops, changed) = recolor_operations(vec![Operation::new("rg", vec![int(1)])]);
        assert_eq!(changed, 0);
        assert_eq!(operators(&ops), vec!["rg"]);
    }

    #[test]
    fn gray_samples_weights_channels() {
        assert_eq!(gray_samples(&[255, 255, 255, 0, 0, 0], 3, 2), Some(vec![255, 0]));
        assert_eq!(gray_samples(&[0, 0, 0, 255], 4, 1), Some(vec![0]));
        assert_eq!(gray_samples(&[0, 0, 0, 0], 4, 1), Some(vec![255]));
        assert_eq!(gray_samples(&[1, 2], 3, 1), None);
    }

    #[test]
    fn grayscale_rewrites_page_and_image() {
        let config = CompressionConfig::default();
        let outcome = compress(&sample_pdf(), true, &config, Uuid::new_v4()).unwrap();
        assert!(outcome.bytes.starts_with(b"%PDF"));
        assert!(outcome.artifact.is_none());

        let doc = Document::load_mem(&outcome.bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();

        let content = doc.get_and_decode_page_content(page_id).unwrap();
        let ops = operators(&content.operations);
        assert!(ops.contains(&"g"));
        assert!(!ops.contains(&"rg"));

        let page = doc.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        assert_eq!(number(&media_box[2]), Some(612.0));
        assert_eq!(number(&media_box[3]), Some(792.0));

        let image = doc
            .objects
            .values()
            .find_map(|o| match o {
                Object::Stream(s) if name_of(&s.dict, b"Subtype") == Some(&b"Image"[..]) => Some(s),
                _ => None,
            })
            .unwrap();
        assert_eq!(name_of(&image.dict, b"ColorSpace"), Some(DEVICE_GRAY));
        assert_eq!(plain_content(image), vec![76, 29]);
    }

    #[test]
    fn color_is_kept_without_grayscale() {
        let config = CompressionConfig::default();
        let outcome = compress(&sample_pdf(), false, &config, Uuid::new_v4()).unwrap();
        let stages: Vec<Stage> = outcome.stages.iter().map(|t| t.stage).collect();
        assert_eq!(stages, vec![Stage::Load, Stage::Save, Stage::SizeCheck]);

        let doc = Document::load_mem(&outcome.bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = doc.get_and_decode_page_content(page_id).unwrap();
        assert!(operators(&content.operations).contains(&"rg"));
    }

    #[test]
    fn recolor_reports_counts() {
        let mut doc = Document::load_mem(&sample_pdf()).unwrap();
        let report = recolor_document(&mut doc, 60).unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.operators, 1);
        assert_eq!(report.images, 1);
        assert_eq!(report.forms, 0);
    }

    #[test]
    fn garbage_is_corrupt_input() {
        let err = compress(b"not a pdf at all", false, &CompressionConfig::default(), Uuid::new_v4())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptInput);
        assert_eq!(err.stage(), Stage::Load);
    }

    #[test]
    fn oversize_output_is_rejected() {
        let config = CompressionConfig::builder().max_output_bytes(16).build().unwrap();
        let err = compress(&sample_pdf(), false, &config, Uuid::new_v4()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SizeLimitExceeded);
    }
}
