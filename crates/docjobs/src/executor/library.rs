//! In-process PDF operations on top of `lopdf`.
//!
//! Every function reads its input from disk and returns the bytes of the
//! produced document. Page numbers are 1-based and re-checked against the
//! opened document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use regex::RegexBuilder;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::overlay::{self, Watermark};
use super::{Artifact, InputFile};
use crate::error::JobError;
use crate::job::{CompressionLevel, CropMargins};

const PDF: &str = "application/pdf";

/// A4 in points.
pub(crate) const A4: (f32, f32) = (595.28, 841.89);

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

pub(crate) fn failed(context: &str, err: impl std::fmt::Display) -> JobError {
    JobError::BackendExecutionFailed(format!("{}: {}", context, err))
}

pub(crate) fn real(value: f32) -> Object {
    Object::Real(value.into())
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

/// Follows a reference one level; other objects are returned as is.
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

/// Opens a PDF input, refusing password protected documents.
pub fn load(input: &InputFile) -> Result<Document, JobError> {
    let doc = Document::load(&input.path)
        .map_err(|e| failed(&format!("cannot open {}", input.name), e))?;
    if doc.is_encrypted() {
        return Err(JobError::BackendExecutionFailed(format!(
            "{} is password protected; unlock it first",
            input.name
        )));
    }
    debug!(pages = doc.get_pages().len(), input = %input.id, "PDF loaded");
    Ok(doc)
}

pub(crate) fn save(doc: &mut Document) -> Result<Vec<u8>, JobError> {
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| failed("cannot serialise PDF", e))?;
    Ok(output)
}

/// Number of pages of the PDF at `path`.
pub fn page_count(path: &Path) -> Result<u32, JobError> {
    let doc = Document::load(path).map_err(|e| failed("cannot open PDF", e))?;
    Ok(doc.get_pages().len() as u32)
}

pub fn page_count_of(bytes: &[u8]) -> Result<u32, JobError> {
    let doc = Document::load_mem(bytes).map_err(|e| failed("cannot parse PDF", e))?;
    Ok(doc.get_pages().len() as u32)
}

fn check_pages(pages: &[u32], page_count: u32) -> Result<(), JobError> {
    match pages.iter().find(|&&p| p == 0 || p > page_count) {
        Some(&page) => Err(JobError::PageOutOfRange { page, page_count }),
        None => Ok(()),
    }
}

/// Page numbers and ids for a selection (all pages when `None`), in
/// document order without repeats.
pub(crate) fn select_pages(
    doc: &Document,
    pages: Option<&[u32]>,
) -> Result<Vec<(u32, ObjectId)>, JobError> {
    let all = doc.get_pages();
    match pages {
        None => Ok(all.into_iter().collect()),
        Some(selection) => {
            check_pages(selection, all.len() as u32)?;
            let wanted: BTreeSet<u32> = selection.iter().copied().collect();
            Ok(all
                .into_iter()
                .filter(|(number, _)| wanted.contains(number))
                .collect())
        }
    }
}

fn inherited_attribute(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    // Bounded walk; malformed trees can loop.
    for _ in 0..64 {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// Copies inherited attributes onto each page so pages can be moved or
/// edited without their original ancestors.
pub(crate) fn materialize_inherited(doc: &mut Document) {
    let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for page_id in pages {
        for key in INHERITABLE {
            let has_own = doc
                .get_dictionary(page_id)
                .map(|dict| dict.has(key))
                .unwrap_or(true);
            if has_own {
                continue;
            }
            if let Some(value) = inherited_attribute(doc, page_id, key) {
                if let Ok(dict) = doc.get_dictionary_mut(page_id) {
                    dict.set(key.to_vec(), value);
                }
            }
        }
    }
}

/// The page's media box as `[llx, lly, urx, ury]`, normalized.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> [f32; 4] {
    let values: Option<Vec<f32>> = inherited_attribute(doc, page_id, b"MediaBox").and_then(|obj| {
        match resolve(doc, &obj) {
            Object::Array(items) => items.iter().map(|i| number(resolve(doc, i))).collect(),
            _ => None,
        }
    });
    match values.as_deref() {
        Some([x1, y1, x2, y2]) => [x1.min(*x2), y1.min(*y2), x1.max(*x2), y1.max(*y2)],
        _ => [0.0, 0.0, A4.0, A4.1],
    }
}

fn type_name(object: &Object) -> Option<&[u8]> {
    let dict = match object {
        Object::Dictionary(dict) => dict,
        Object::Stream(stream) => &stream.dict,
        _ => return None,
    };
    dict.get(b"Type").ok()?.as_name().ok()
}

/// Builds a fresh page tree and catalog over `kids`.
fn finish_document(doc: &mut Document, pages_id: ObjectId, kids: Vec<ObjectId>) {
    for id in &kids {
        if let Ok(dict) = doc.get_dictionary_mut(*id) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
}

/// Concatenates the inputs' pages in input order.
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub fn merge(inputs: &[InputFile]) -> Result<Vec<u8>, JobError> {
    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut kids = Vec::new();

    for input in inputs {
        let mut doc = load(input)?;
        materialize_inherited(&mut doc);
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        kids.extend(doc.get_pages().into_values());
        for (id, object) in doc.objects {
            let structural = matches!(
                type_name(&object),
                Some(b"Catalog") | Some(b"Pages") | Some(b"Outlines") | Some(b"Outline")
            );
            if !structural {
                merged.objects.insert(id, object);
            }
        }
    }

    merged.max_id = next_id;
    let pages_id = (next_id, 0);
    info!(pages = kids.len(), "Merging documents");
    finish_document(&mut merged, pages_id, kids);
    merged.prune_objects();
    merged.renumber_objects();
    save(&mut merged)
}

/// Copy of `doc` holding only the pages in `keep`.
fn keep_only(doc: &Document, keep: &BTreeSet<u32>) -> Result<Vec<u8>, JobError> {
    let mut copy = doc.clone();
    let total = copy.get_pages().len() as u32;
    let drop: Vec<u32> = (1..=total).filter(|p| !keep.contains(p)).collect();
    if !drop.is_empty() {
        copy.delete_pages(&drop);
    }
    copy.prune_objects();
    save(&mut copy)
}

/// Splits into consecutive parts of `span` pages.
#[instrument(skip_all, fields(input = %input.id, span))]
pub fn split(input: &InputFile, span: u32) -> Result<Vec<Artifact>, JobError> {
    let doc = load(input)?;
    let total = doc.get_pages().len() as u32;
    if total == 0 {
        return Err(JobError::BackendExecutionFailed(format!(
            "{} has no pages",
            input.name
        )));
    }

    let span = span.max(1);
    let mut parts = Vec::new();
    let mut start = 1u32;
    while start <= total {
        let end = start.saturating_add(span - 1).min(total);
        let keep: BTreeSet<u32> = (start..=end).collect();
        parts.push(Artifact::new(
            format!("{}_part-{}.pdf", input.stem(), parts.len() + 1),
            PDF,
            keep_only(&doc, &keep)?,
        ));
        start = end + 1;
    }

    info!(parts = parts.len(), "Split document");
    Ok(parts)
}

/// Keeps the selected pages, in document order.
pub fn extract_pages(input: &InputFile, pages: &[u32]) -> Result<Vec<u8>, JobError> {
    let doc = load(input)?;
    check_pages(pages, doc.get_pages().len() as u32)?;
    keep_only(&doc, &pages.iter().copied().collect())
}

pub fn remove_pages(input: &InputFile, pages: &[u32]) -> Result<Vec<u8>, JobError> {
    let doc = load(input)?;
    let total = doc.get_pages().len() as u32;
    check_pages(pages, total)?;

    let removed: BTreeSet<u32> = pages.iter().copied().collect();
    if removed.len() as u32 >= total {
        return Err(JobError::BackendExecutionFailed(
            "cannot remove every page of the document".to_string(),
        ));
    }
    let keep: BTreeSet<u32> = (1..=total).filter(|p| !removed.contains(p)).collect();
    keep_only(&doc, &keep)
}

#[instrument(skip_all, fields(input = %input.id, level = ?level))]
pub fn compress(input: &InputFile, level: CompressionLevel) -> Result<Vec<u8>, JobError> {
    let mut doc = load(input)?;

    match level {
        CompressionLevel::Low => {}
        CompressionLevel::Medium => {
            doc.delete_zero_length_streams();
            doc.prune_objects();
        }
        CompressionLevel::High => {
            doc.trailer.remove(b"Info");
            let root = doc
                .trailer
                .get(b"Root")
                .and_then(Object::as_reference)
                .ok();
            if let Some(root) = root {
                if let Ok(catalog) = doc.get_dictionary_mut(root) {
                    catalog.remove(b"Metadata");
                }
            }
            doc.delete_zero_length_streams();
            doc.prune_objects();
            doc.renumber_objects();
        }
    }
    doc.compress();

    let output = save(&mut doc)?;
    let before = std::fs::metadata(&input.path).map(|m| m.len()).unwrap_or(0);
    info!(before, after = output.len(), "Compressed document");
    Ok(output)
}

/// Adds `angle` (a multiple of 90) to each selected page's rotation.
pub fn rotate(input: &InputFile, angle: i32, pages: Option<&[u32]>) -> Result<Vec<u8>, JobError> {
    let mut doc = load(input)?;
    materialize_inherited(&mut doc);

    for (_, page_id) in select_pages(&doc, pages)? {
        let current = doc
            .get_dictionary(page_id)
            .ok()
            .and_then(|dict| dict.get(b"Rotate").ok())
            .and_then(|r| r.as_i64().ok())
            .unwrap_or(0);
        let rotation = (current + i64::from(angle)).rem_euclid(360);
        if let Ok(dict) = doc.get_dictionary_mut(page_id) {
            dict.set("Rotate", Object::Integer(rotation));
        }
    }

    save(&mut doc)
}

/// Sets each selected page's crop box to its media box shrunk by `margins`.
pub fn crop(input: &InputFile, margins: &CropMargins, pages: Option<&[u32]>) -> Result<Vec<u8>, JobError> {
    let mut doc = load(input)?;
    materialize_inherited(&mut doc);

    for (number, page_id) in select_pages(&doc, pages)? {
        let [llx, lly, urx, ury] = page_box(&doc, page_id);
        let cropped = [
            llx + margins.left,
            lly + margins.bottom,
            urx - margins.right,
            ury - margins.top,
        ];
        if cropped[2] - cropped[0] < 1.0 || cropped[3] - cropped[1] < 1.0 {
            return Err(JobError::BackendExecutionFailed(format!(
                "margins leave nothing of page {}",
                number
            )));
        }
        if let Ok(dict) = doc.get_dictionary_mut(page_id) {
            dict.set(
                "CropBox",
                cropped.iter().map(|v| real(*v)).collect::<Vec<_>>(),
            );
        }
    }

    save(&mut doc)
}

pub fn watermark(input: &InputFile, watermark: &Watermark, pages: Option<&[u32]>) -> Result<Vec<u8>, JobError> {
    let mut doc = load(input)?;
    let selected = select_pages(&doc, pages)?;
    overlay::stamp(&mut doc, &selected, |_, media| {
        vec![overlay::watermark_overlay(watermark, media)]
    })?;
    save(&mut doc)
}

/// Stamps header and footer lines; `{page}` and `{pages}` are replaced with
/// the page number and page count.
pub fn header_footer(
    input: &InputFile,
    header: Option<&str>,
    footer: Option<&str>,
    font_size: f32,
    pages: Option<&[u32]>,
) -> Result<Vec<u8>, JobError> {
    let mut doc = load(input)?;
    let total = doc.get_pages().len() as u32;
    let selected = select_pages(&doc, pages)?;
    overlay::stamp(&mut doc, &selected, |number, media| {
        overlay::header_footer_overlays(header, footer, font_size, number, total, media)
    })?;
    save(&mut doc)
}

/// Page size for an image: A4 in the image's orientation.
fn fit_on_a4(width: u32, height: u32) -> ([f32; 2], [f32; 4]) {
    const MARGIN: f32 = 20.0;
    let page = if width > height {
        [A4.1, A4.0]
    } else {
        [A4.0, A4.1]
    };
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    let scale = ((page[0] - 2.0 * MARGIN) / w).min((page[1] - 2.0 * MARGIN) / h);
    let (draw_w, draw_h) = (w * scale, h * scale);
    (
        page,
        [
            (page[0] - draw_w) / 2.0,
            (page[1] - draw_h) / 2.0,
            draw_w,
            draw_h,
        ],
    )
}

/// One page per image, in input order.
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub fn images_to_pdf(inputs: &[InputFile]) -> Result<Vec<u8>, JobError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(inputs.len());

    for (index, input) in inputs.iter().enumerate() {
        let bytes = std::fs::read(&input.path)
            .map_err(|e| failed(&format!("cannot read {}", input.name), e))?;
        let rgb = image::load_from_memory(&bytes)
            .map_err(|e| failed(&format!("{} is not a readable image", input.name), e))?
            .to_rgb8();
        let (width, height) = rgb.dimensions();

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&rgb)
            .map_err(|e| failed("cannot encode image", e))?;

        let image_id = doc.add_object(
            Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(width),
                    "Height" => i64::from(height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                jpeg,
            )
            .with_compression(false),
        );

        let (page, [x, y, draw_w, draw_h]) = fit_on_a4(width, height);
        let name = format!("Im{}", index + 1);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![real(draw_w), real(0.0), real(0.0), real(draw_h), real(x), real(y)],
                ),
                Operation::new("Do", vec![Object::Name(name.clone().into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content
                .encode()
                .map_err(|e| failed("cannot encode page content", e))?,
        ));

        kids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), real(page[0]), real(page[1])],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { name.as_str() => image_id },
            },
        }));
    }

    finish_document(&mut doc, pages_id, kids);
    save(&mut doc)
}

/// Whether the page draws images or shadings.
fn page_has_graphics(doc: &Document, page_id: ObjectId) -> bool {
    let content = doc
        .get_page_content(page_id)
        .ok()
        .and_then(|bytes| Content::decode(&bytes).ok());
    match content {
        Some(content) => content
            .operations
            .iter()
            .any(|op| matches!(op.operator.as_str(), "Do" | "BI" | "sh")),
        // Unparseable content is never reported blank.
        None => true,
    }
}

fn page_text(doc: &Document, number: u32) -> String {
    doc.extract_text(&[number]).unwrap_or_default()
}

fn to_json<T: Serialize>(report: &T) -> Result<Vec<u8>, JobError> {
    serde_json::to_vec_pretty(report).map_err(|e| failed("cannot encode report", e))
}

#[derive(Debug, Serialize)]
struct BlankPageReport {
    page_count: u32,
    min_text_length: usize,
    blank_pages: Vec<u32>,
}

/// Reports pages with fewer than `min_text_length` visible characters and no
/// images.
pub fn detect_blank_pages(input: &InputFile, min_text_length: usize) -> Result<Vec<u8>, JobError> {
    let doc = load(input)?;
    let pages = doc.get_pages();

    let blank_pages: Vec<u32> = pages
        .iter()
        .filter(|(number, page_id)| {
            let visible = page_text(&doc, **number)
                .chars()
                .filter(|c| !c.is_whitespace())
                .count();
            visible < min_text_length && !page_has_graphics(&doc, **page_id)
        })
        .map(|(number, _)| *number)
        .collect();

    debug!(blank = blank_pages.len(), "Blank page scan finished");
    to_json(&BlankPageReport {
        page_count: pages.len() as u32,
        min_text_length,
        blank_pages,
    })
}

#[derive(Debug, Serialize)]
struct PageMatches {
    page: u32,
    matches: usize,
    snippets: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SearchReport {
    query: String,
    total_matches: usize,
    pages: Vec<PageMatches>,
}

#[derive(Debug, Serialize)]
struct PageText {
    page: u32,
    text: String,
}

#[derive(Debug, Serialize)]
struct TextReport {
    page_count: u32,
    pages: Vec<PageText>,
}

const SNIPPET_CONTEXT: usize = 40;
const MAX_SNIPPETS: usize = 3;

fn snippet(text: &str, start: usize, end: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .nth(SNIPPET_CONTEXT - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .nth(SNIPPET_CONTEXT)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[from..to].split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-insensitive search for `query`, or the text of every page when no
/// query is given.
pub fn text_search(input: &InputFile, query: Option<&str>) -> Result<Vec<u8>, JobError> {
    let doc = load(input)?;
    let numbers: Vec<u32> = doc.get_pages().into_keys().collect();

    let Some(query) = query else {
        let pages = numbers
            .iter()
            .map(|&page| PageText {
                page,
                text: page_text(&doc, page).trim().to_string(),
            })
            .collect();
        return to_json(&TextReport {
            page_count: numbers.len() as u32,
            pages,
        });
    };

    let pattern = RegexBuilder::new(&regex::escape(query.trim()))
        .case_insensitive(true)
        .build()
        .map_err(|e| JobError::InvalidParameters(format!("unusable search query: {}", e)))?;

    let mut pages = Vec::new();
    for page in numbers {
        let text = page_text(&doc, page);
        let found: Vec<_> = pattern.find_iter(&text).collect();
        if found.is_empty() {
            continue;
        }
        pages.push(PageMatches {
            page,
            matches: found.len(),
            snippets: found
                .iter()
                .take(MAX_SNIPPETS)
                .map(|m| snippet(&text, m.start(), m.end()))
                .collect(),
        });
    }

    to_json(&SearchReport {
        query: query.trim().to_string(),
        total_matches: pages.iter().map(|p| p.matches).sum(),
        pages,
    })
}

/// All text of the document, pages separated by blank lines.
pub fn extract_text(input: &InputFile) -> Result<String, JobError> {
    let doc = load(input)?;
    let text = doc
        .get_pages()
        .into_keys()
        .map(|page| page_text(&doc, page).trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if text.is_empty() {
        return Err(JobError::BackendExecutionFailed(format!(
            "{} has no extractable text",
            input.name
        )));
    }
    Ok(text)
}

#[derive(Debug, Serialize)]
struct PageInfo {
    page: u32,
    width: f32,
    height: f32,
    rotation: i64,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    page_count: u32,
    pdf_version: String,
    encrypted: bool,
    file_size: u64,
    info: BTreeMap<String, String>,
    pages: Vec<PageInfo>,
}

/// Decodes a PDF text string: UTF-16BE with a byte order mark, otherwise
/// single-byte.
fn decode_pdf_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn document_info(doc: &Document) -> BTreeMap<String, String> {
    let mut info = BTreeMap::new();
    let dict = match doc.trailer.get(b"Info").map(|obj| resolve(doc, obj)) {
        Ok(Object::Dictionary(dict)) => dict,
        _ => return info,
    };
    for (key, value) in dict.iter() {
        if let Object::String(bytes, _) = resolve(doc, value) {
            info.insert(
                String::from_utf8_lossy(key).into_owned(),
                decode_pdf_string(bytes),
            );
        }
    }
    info
}

/// Structural summary of the document as JSON.
pub fn inspect(input: &InputFile) -> Result<Vec<u8>, JobError> {
    let mut doc = Document::load(&input.path)
        .map_err(|e| failed(&format!("cannot open {}", input.name), e))?;
    materialize_inherited(&mut doc);

    let pages = doc
        .get_pages()
        .into_iter()
        .map(|(page, page_id)| {
            let [llx, lly, urx, ury] = page_box(&doc, page_id);
            let rotation = doc
                .get_dictionary(page_id)
                .ok()
                .and_then(|dict| dict.get(b"Rotate").ok())
                .and_then(|r| r.as_i64().ok())
                .unwrap_or(0);
            PageInfo {
                page,
                width: urx - llx,
                height: ury - lly,
                rotation,
            }
        })
        .collect::<Vec<_>>();

    to_json(&InspectReport {
        page_count: pages.len() as u32,
        pdf_version: doc.version.clone(),
        encrypted: doc.is_encrypted(),
        file_size: std::fs::metadata(&input.path).map(|m| m.len()).unwrap_or(0),
        info: document_info(&doc),
        pages,
    })
}
