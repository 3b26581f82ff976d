//! Shared helpers for the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine;
use lopdf::content::Content;
use lopdf::{Document, Object};
use mailpdf::config::{Config, RenderConfig};
use mailpdf::convert::Converter;
use mailpdf::render::layout::{Page, PageGeometry};

/// Stands for an image draw in [`page_items`] output.
pub const IMAGE: &str = "[image]";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

/// A converter with default settings, or `None` when the machine has no
/// usable TrueType font.
pub fn converter() -> Option<Converter> {
    match Converter::from_config(&Config::default()) {
        Ok(converter) => Some(converter),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

pub fn page_count(pdf: &[u8]) -> usize {
    Document::load_mem(pdf).unwrap().get_pages().len()
}

/// Text lines and image draws of every page, in drawing order.
///
/// Glyph codes are mapped back to characters through each font's
/// `ToUnicode` CMap, the same way a viewer extracts text.
pub fn page_items(pdf: &[u8]) -> Vec<Vec<String>> {
    let doc = Document::load_mem(pdf).unwrap();
    let mut pages = Vec::new();
    for page_id in doc.get_pages().into_values() {
        let page = doc.get_dictionary(page_id).unwrap();
        let fonts = page_fonts(&doc, page);

        let content_id = page.get(b"Contents").and_then(Object::as_reference).unwrap();
        let stream = doc.get_object(content_id).and_then(Object::as_stream).unwrap();
        let content = Content::decode(&stream.decompressed_content().unwrap_or_else(|_| stream.content.clone())).unwrap();

        let mut items = Vec::new();
        let mut line = String::new();
        let mut font = Vec::new();
        for op in content.operations {
            match op.operator.as_str() {
                "BT" => line.clear(),
                "Tf" => font = op.operands[0].as_name().unwrap().to_vec(),
                "Tj" => {
                    let Object::String(ref codes, _) = op.operands[0] else {
                        panic!("Tj without a string");
                    };
                    let map = &fonts[&font];
                    for pair in codes.chunks(2) {
                        let gid = u16::from_be_bytes([pair[0], pair[1]]);
                        line.push_str(map.get(&gid).map(String::as_str).unwrap_or("\u{FFFD}"));
                    }
                }
                "ET" => items.push(std::mem::take(&mut line)),
                "Do" => items.push(IMAGE.to_string()),
                _ => {}
            }
        }
        pages.push(items);
    }
    pages
}

/// Resource name -> glyph id -> text, for every font of a page.
fn page_fonts(doc: &Document, page: &lopdf::Dictionary) -> BTreeMap<Vec<u8>, BTreeMap<u16, String>> {
    let mut out = BTreeMap::new();
    let Ok(fonts) = page
        .get(b"Resources")
        .and_then(Object::as_dict)
        .and_then(|r| r.get(b"Font"))
        .and_then(Object::as_dict)
    else {
        return out;
    };
    for (name, reference) in fonts.iter() {
        let font = doc.get_dictionary(reference.as_reference().unwrap()).unwrap();
        let cmap_id = font.get(b"ToUnicode").and_then(Object::as_reference).unwrap();
        let stream = doc.get_object(cmap_id).and_then(Object::as_stream).unwrap();
        let cmap = stream.decompressed_content().unwrap_or_else(|_| stream.content.clone());
        out.insert(name.clone(), parse_cmap(&String::from_utf8_lossy(&cmap)));
    }
    out
}

fn parse_cmap(cmap: &str) -> BTreeMap<u16, String> {
    let entry = regex::Regex::new(r"<([0-9A-Fa-f]{4})>\s*<([0-9A-Fa-f]+)>").unwrap();
    let mut map = BTreeMap::new();
    for section in cmap.split("beginbfchar").skip(1) {
        let section = section.split("endbfchar").next().unwrap_or("");
        for caps in entry.captures_iter(section) {
            let gid = u16::from_str_radix(&caps[1], 16).unwrap();
            let units: Vec<u16> = caps[2]
                .as_bytes()
                .chunks(4)
                .map(|c| u16::from_str_radix(std::str::from_utf8(c).unwrap(), 16).unwrap())
                .collect();
            map.insert(gid, String::from_utf16_lossy(&units));
        }
    }
    map
}

/// Every text line of the document joined with newlines.
pub fn all_text(pdf: &[u8]) -> String {
    page_items(pdf).into_iter().flatten().collect::<Vec<_>>().join("\n")
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A PDF of `pages` empty A4 pages.
pub fn blank_pdf(pages: usize) -> Vec<u8> {
    let geometry = PageGeometry::from_config(&RenderConfig::default());
    mailpdf::render::pdf::write(&vec![Page::default(); pages], &[], None, &geometry, "blank")
        .unwrap()
        .bytes
}

/// A multipart/mixed message with a text body and one base64 attachment.
pub fn eml_with_attachment(subject: &str, body: &str, filename: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let wrapped: Vec<&str> = encoded
        .as_bytes()
        .chunks(76)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect();
    format!(
        "From: sender@example.com\r\n\
         To: receiver@example.com\r\n\
         Subject: {subject}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"mix\"\r\n\
         \r\n\
         --mix\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n\
         --mix\r\n\
         Content-Type: {content_type}; name=\"{filename}\"\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         {}\r\n\
         --mix--\r\n",
        wrapped.join("\r\n")
    )
    .into_bytes()
}
