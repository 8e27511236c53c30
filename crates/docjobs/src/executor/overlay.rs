//! Text drawn onto existing pages, and a plain text-to-PDF writer.
//!
//! Both use the standard Helvetica font with WinAnsi encoding, so characters
//! outside Latin-1 are replaced with `?`.

use std::collections::BTreeMap;

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};

use super::library::{failed, materialize_inherited, page_box, real, resolve, save, A4};
use crate::error::JobError;

const FONT_NAME: &[u8] = b"DjHelv";
const EDGE_MARGIN: f32 = 24.0;

/// Parameters of a diagonal text watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub text: String,
    pub font_size: f32,
    pub opacity: f32,
    /// Counter-clockwise, in degrees.
    pub rotation: f32,
}

/// One line of text placed on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextOverlay {
    pub text: String,
    pub font_size: f32,
    /// Baseline origin in page space.
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub opacity: f32,
    /// Fill gray level, 0 is black.
    pub gray: f32,
}

fn helvetica() -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    }
}

fn latin1(text: &str) -> Object {
    let bytes = text
        .chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

/// Rough Helvetica advance width.
fn text_width(text: &str, font_size: f32) -> f32 {
    text.chars().count() as f32 * font_size * 0.5
}

/// Centers the watermark on the page, rotated about its middle.
pub fn watermark_overlay(watermark: &Watermark, media: [f32; 4]) -> TextOverlay {
    let [llx, lly, urx, ury] = media;
    let (cx, cy) = ((llx + urx) / 2.0, (lly + ury) / 2.0);
    let (sin, cos) = watermark.rotation.to_radians().sin_cos();
    let half_width = text_width(&watermark.text, watermark.font_size) / 2.0;
    let half_height = watermark.font_size * 0.35;

    TextOverlay {
        text: watermark.text.clone(),
        font_size: watermark.font_size,
        x: cx - (half_width * cos - half_height * sin),
        y: cy - (half_width * sin + half_height * cos),
        rotation: watermark.rotation,
        opacity: watermark.opacity,
        gray: 0.5,
    }
}

fn fill_placeholders(template: &str, page: u32, pages: u32) -> String {
    template
        .replace("{page}", &page.to_string())
        .replace("{pages}", &pages.to_string())
}

/// Centered header and footer lines for one page.
pub fn header_footer_overlays(
    header: Option<&str>,
    footer: Option<&str>,
    font_size: f32,
    page: u32,
    pages: u32,
    media: [f32; 4],
) -> Vec<TextOverlay> {
    let [llx, lly, urx, ury] = media;
    let centered = |text: String, y: f32| TextOverlay {
        x: (llx + urx) / 2.0 - text_width(&text, font_size) / 2.0,
        y,
        text,
        font_size,
        rotation: 0.0,
        opacity: 1.0,
        gray: 0.0,
    };

    let mut overlays = Vec::new();
    if let Some(header) = header.filter(|h| !h.trim().is_empty()) {
        overlays.push(centered(
            fill_placeholders(header, page, pages),
            ury - EDGE_MARGIN - font_size,
        ));
    }
    if let Some(footer) = footer.filter(|f| !f.trim().is_empty()) {
        overlays.push(centered(fill_placeholders(footer, page, pages), lly + EDGE_MARGIN));
    }
    overlays
}

fn text_operations(overlay: &TextOverlay, graphics_state: &[u8]) -> Vec<Operation> {
    let (sin, cos) = overlay.rotation.to_radians().sin_cos();
    vec![
        Operation::new("q", vec![]),
        Operation::new("gs", vec![Object::Name(graphics_state.to_vec())]),
        Operation::new("g", vec![real(overlay.gray)]),
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(FONT_NAME.to_vec()), real(overlay.font_size)],
        ),
        Operation::new(
            "Tm",
            vec![
                real(cos),
                real(sin),
                real(-sin),
                real(cos),
                real(overlay.x),
                real(overlay.y),
            ],
        ),
        Operation::new("Tj", vec![latin1(&overlay.text)]),
        Operation::new("ET", vec![]),
        Operation::new("Q", vec![]),
    ]
}

/// The page's resources as an owned dictionary, with the font and graphics
/// state sub-dictionaries resolved so they can be extended in place.
fn owned_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut resources = match doc
        .get_dictionary(page_id)
        .ok()
        .and_then(|page| page.get(b"Resources").ok())
        .map(|obj| resolve(doc, obj))
    {
        Some(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };

    for key in [b"Font".as_slice(), b"ExtGState".as_slice()] {
        let resolved = match resources.get(key).map(|obj| resolve(doc, obj)) {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        resources.set(key.to_vec(), Object::Dictionary(resolved));
    }
    resources
}

/// Wraps the existing content in `q ... Q` and appends `overlay` after it,
/// so the page's own graphics state cannot leak into the stamp.
fn append_content(doc: &mut Document, page_id: ObjectId, overlay: Vec<u8>) -> Result<(), JobError> {
    let existing: Vec<Object> = {
        let page = doc
            .get_dictionary(page_id)
            .map_err(|e| failed("page dictionary missing", e))?;
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    };

    let open_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let mut closing = b"Q\n".to_vec();
    closing.extend(overlay);
    let overlay_id = doc.add_object(Stream::new(Dictionary::new(), closing));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(open_id));
    contents.extend(existing);
    contents.push(Object::Reference(overlay_id));

    doc.get_dictionary_mut(page_id)
        .map_err(|e| failed("page dictionary missing", e))?
        .set("Contents", Object::Array(contents));
    Ok(())
}

/// Draws the overlays returned by `overlays_for(page_number, media_box)` on
/// each of `pages`.
pub fn stamp<F>(doc: &mut Document, pages: &[(u32, ObjectId)], mut overlays_for: F) -> Result<(), JobError>
where
    F: FnMut(u32, [f32; 4]) -> Vec<TextOverlay>,
{
    materialize_inherited(doc);
    let font_id = doc.add_object(helvetica());
    // One shared graphics state per distinct opacity.
    let mut states: BTreeMap<u32, ObjectId> = BTreeMap::new();

    for &(number, page_id) in pages {
        let overlays = overlays_for(number, page_box(doc, page_id));
        if overlays.is_empty() {
            continue;
        }

        let mut resources = owned_resources(doc, page_id);
        let mut fonts = match resources.get(b"Font") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        let mut graphics_states = match resources.get(b"ExtGState") {
            Ok(Object::Dictionary(dict)) => dict.clone(),
            _ => Dictionary::new(),
        };
        fonts.set(FONT_NAME.to_vec(), Object::Reference(font_id));

        let mut operations = Vec::new();
        for overlay in &overlays {
            let opacity = overlay.opacity.clamp(0.0, 1.0);
            let key = (opacity * 1000.0).round() as u32;
            let state_id = match states.get(&key) {
                Some(id) => *id,
                None => {
                    let id = doc.add_object(dictionary! {
                        "Type" => "ExtGState",
                        "ca" => real(opacity),
                        "CA" => real(opacity),
                    });
                    states.insert(key, id);
                    id
                }
            };
            let name = format!("DjGs{}", key).into_bytes();
            graphics_states.set(name.clone(), Object::Reference(state_id));
            operations.extend(text_operations(overlay, &name));
        }

        resources.set("Font", Object::Dictionary(fonts));
        resources.set("ExtGState", Object::Dictionary(graphics_states));
        doc.get_dictionary_mut(page_id)
            .map_err(|e| failed("page dictionary missing", e))?
            .set("Resources", Object::Dictionary(resources));

        let encoded = Content { operations }
            .encode()
            .map_err(|e| failed("cannot encode overlay", e))?;
        append_content(doc, page_id, encoded)?;
    }
    Ok(())
}

/// Greedy word wrap to `max_chars` per line; blank input lines are kept.
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > max_chars {
                if !line.is_empty() {
                    lines.push(std::mem::take(&mut line));
                }
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if line.is_empty() { word.len() } else { line.chars().count() + 1 + word.len() };
            if needed > max_chars && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if !line.is_empty() {
                line.push(' ');
            }
            line.extend(word);
        }
        lines.push(line);
    }
    lines
}

/// Lays `text` out on A4 pages.
pub fn text_document(text: &str, font_size: f32) -> Result<Vec<u8>, JobError> {
    const MARGIN: f32 = 56.0;
    let leading = font_size * 1.35;
    let max_chars = ((A4.0 - 2.0 * MARGIN) / (font_size * 0.5)).floor().max(10.0) as usize;
    let per_page = (((A4.1 - 2.0 * MARGIN) / leading).floor() as usize).max(1);
    let lines = wrap_text(text, max_chars);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(helvetica());

    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![lines.as_slice()]
    } else {
        lines.chunks(per_page).collect()
    };

    let mut kids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), real(font_size)]),
            Operation::new("TL", vec![real(leading)]),
            Operation::new("Td", vec![real(MARGIN), real(A4.1 - MARGIN - font_size)]),
        ];
        for line in chunk {
            operations.push(Operation::new("Tj", vec![latin1(line)]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }
            .encode()
            .map_err(|e| failed("cannot encode page content", e))?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), real(A4.0), real(A4.1)],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();
    save(&mut doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::library::tests::sample_pdf;

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("one two three four\n\nsupercalifragilistic", 10);
        assert_eq!(
            lines,
            vec!["one two", "three four", "", "supercalif", "ragilistic"]
        );
    }

    #[test]
    fn test_latin1_replaces_wide_chars() {
        match latin1("Grüße ✓") {
            Object::String(bytes, _) => assert_eq!(bytes, b"Gr\xfc\xdfe ?".to_vec()),
            other => panic!("Expected string, got {:?}", other),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(fill_placeholders("Page {page} / {pages}", 2, 9), "Page 2 / 9");
    }

    #[test]
    fn test_header_footer_positions() {
        let overlays = header_footer_overlays(
            Some("Title"),
            Some("{page}"),
            10.0,
            1,
            3,
            [0.0, 0.0, 600.0, 800.0],
        );
        assert_eq!(overlays.len(), 2);
        assert!(overlays[0].y > 700.0);
        assert!(overlays[1].y < 100.0);
        assert_eq!(overlays[1].text, "1");

        assert!(header_footer_overlays(Some("  "), None, 10.0, 1, 1, [0.0; 4]).is_empty());
    }

    #[test]
    fn test_watermark_centered_without_rotation() {
        let overlay = watermark_overlay(
            &Watermark {
                text: "DRAFT".into(),
                font_size: 40.0,
                opacity: 0.3,
                rotation: 0.0,
            },
            [0.0, 0.0, 600.0, 800.0],
        );
        // 5 chars at half an em each.
        assert!((overlay.x - (300.0 - 50.0)).abs() < 0.01);
        assert!((overlay.y - (400.0 - 14.0)).abs() < 0.01);
    }

    #[test]
    fn test_stamp_adds_resources_and_content() {
        let mut doc = Document::load_mem(&sample_pdf(2)).unwrap();
        let pages: Vec<(u32, ObjectId)> = doc.get_pages().into_iter().collect();
        stamp(&mut doc, &pages[..1], |_, _| {
            vec![TextOverlay {
                text: "Stamp".into(),
                font_size: 12.0,
                x: 10.0,
                y: 10.0,
                rotation: 0.0,
                opacity: 0.5,
                gray: 0.0,
            }]
        })
        .unwrap();

        let stamped = doc.get_dictionary(pages[0].1).unwrap();
        let resources = stamped.get(b"Resources").unwrap().as_dict().unwrap();
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        assert!(fonts.has(b"F1"), "existing fonts are kept");
        assert!(fonts.has(FONT_NAME));
        assert!(resources.get(b"ExtGState").unwrap().as_dict().unwrap().has(b"DjGs500"));
        assert_eq!(stamped.get(b"Contents").unwrap().as_array().unwrap().len(), 3);

        let untouched = doc.get_dictionary(pages[1].1).unwrap();
        assert!(untouched.get(b"Contents").unwrap().as_reference().is_ok());

        let text = {
            let bytes = save(&mut doc).unwrap();
            let reloaded = Document::load_mem(&bytes).unwrap();
            reloaded.extract_text(&[1]).unwrap()
        };
        assert!(text.contains("Stamp"));
    }

    #[test]
    fn test_text_document_paginates() {
        let long: String = (0..200).map(|i| format!("Line {}\n", i)).collect();
        let pdf = text_document(&long, 11.0).unwrap();
        let doc = Document::load_mem(&pdf).unwrap();
        assert!(doc.get_pages().len() > 1);

        let empty = text_document("", 11.0).unwrap();
        assert_eq!(Document::load_mem(&empty).unwrap().get_pages().len(), 1);
    }
}
