//! Fixture builders: minimal PDFs, JPEGs and valid parameters per kind.

#![allow(dead_code)]

use std::io::Cursor;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, Stream};

use docjobs::{JobKind, JobParameters};

/// A PDF with `pages` pages, each showing "Page N".
pub fn pdf_with_pages(pages: u32) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("Page {}", n))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content.encode().expect("encode content"),
        ));
        kids.push(doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        }));
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.iter().map(|id| Object::Reference(*id)).collect::<Vec<_>>(),
            "Count" => pages as i64,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save PDF");
    bytes
}

/// Page count and the "Page N" label of every page, in order.
pub fn page_labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).expect("load PDF");
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    pages
        .iter()
        .map(|&n| doc.extract_text(&[n]).expect("extract text").trim().to_string())
        .collect()
}

/// A small solid-colour JPEG.
pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Jpeg)
        .expect("encode JPEG");
    bytes.into_inner()
}

/// Parameters that pass validation for `kind`, for documents of at least
/// two pages.
pub fn valid_parameters(kind: JobKind) -> JobParameters {
    let body = match kind {
        JobKind::RemovePages | JobKind::Extract => serde_json::json!({ "pages": "1" }),
        JobKind::Organize => serde_json::json!({ "order": "2,1" }),
        JobKind::Rotate => serde_json::json!({ "angle": 90 }),
        JobKind::Crop => serde_json::json!({ "margins": { "top": 10.0 } }),
        JobKind::Unlock => serde_json::json!({ "password": "secret" }),
        JobKind::Protect => serde_json::json!({ "user_password": "secret" }),
        JobKind::AddWatermark => serde_json::json!({ "text": "DRAFT" }),
        JobKind::AddHeaderFooter => serde_json::json!({ "header": "Quarterly report" }),
        JobKind::QrCode => serde_json::json!({ "content": "https://example.com" }),
        JobKind::TextSearch => serde_json::json!({ "query": "page" }),
        JobKind::Translate => serde_json::json!({ "target_lang": "de" }),
        _ => serde_json::json!({}),
    };
    docjobs::JobRequest::from_json(kind.as_str(), None, Vec::new(), body)
        .expect("valid parameters")
        .parameters
}

/// How many inputs `kind` needs at minimum.
pub fn input_count(kind: JobKind) -> usize {
    match kind.descriptor().inputs {
        docjobs::job::InputArity::Exactly(n) | docjobs::job::InputArity::AtLeast(n) => n,
    }
}
