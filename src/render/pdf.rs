//! PDF serialization of laid-out pages.
//!
//! Every font is embedded as a Type0 font over a CIDFontType2 descendant
//! with `Identity-H` encoding, so a glyph id is written directly as a
//! two-byte code. A `ToUnicode` CMap maps the codes back for text
//! extraction. Nothing written depends on the clock: the `/ID` is a hash of
//! the page content.

use std::collections::{BTreeMap, BTreeSet};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use sha2::{Digest, Sha256};

use crate::error::{ConvertError, Result};
use crate::render::font::{Font, FontSet};
use crate::render::image::{compress, DecodedImage, ImageData};
use crate::render::layout::{fit, Element, Page, PageGeometry, TextStyle};

const PRODUCER: &str = concat!("mailpdf ", env!("CARGO_PKG_VERSION"));

/// Stroke width of simulated bold, relative to the font size.
const BOLD_STROKE: f32 = 0.04;

/// Serialized document plus characters no loaded font could draw.
#[derive(Debug)]
pub struct PdfOutput {
    pub bytes: Vec<u8>,
    pub missing_glyphs: BTreeSet<char>,
}

/// Glyphs drawn from each font, keyed by font index then glyph id.
type GlyphUsage = BTreeMap<usize, BTreeMap<u16, char>>;

struct EncodedPage {
    content: Vec<u8>,
    fonts: BTreeSet<usize>,
    images: BTreeSet<usize>,
}

/// Write `pages` as a complete PDF. `images` are referenced by index from
/// [`Element::Image`]. `fonts` may be `None` only when no page has text.
pub fn write(
    pages: &[Page],
    images: &[DecodedImage],
    fonts: Option<&FontSet>,
    geometry: &PageGeometry,
    title: &str,
) -> Result<PdfOutput> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let mut usage = GlyphUsage::new();
    let mut missing_glyphs = BTreeSet::new();
    let encoded = pages
        .iter()
        .map(|page| encode_page(page, fonts, &mut usage, &mut missing_glyphs))
        .collect::<Result<Vec<_>>>()?;

    let image_ids = images
        .iter()
        .map(|image| add_image(&mut doc, image))
        .collect::<Result<Vec<_>>>()?;

    let mut font_ids = BTreeMap::new();
    if let Some(fonts) = fonts {
        for (&index, glyphs) in &usage {
            if let Some(font) = fonts.fonts().get(index) {
                font_ids.insert(index, embed_font(&mut doc, font, glyphs)?);
            }
        }
    }

    let mut digest = Sha256::new();
    let mut kids = Vec::with_capacity(encoded.len());
    for page in encoded {
        digest.update(&page.content);

        let mut resources = Dictionary::new();
        let font_dict: Dictionary = page
            .fonts
            .iter()
            .filter_map(|i| font_ids.get(i).map(|&id| (font_resource(*i), Object::Reference(id))))
            .fold(Dictionary::new(), |mut d, (k, v)| {
                d.set(k, v);
                d
            });
        if !font_dict.is_empty() {
            resources.set("Font", font_dict);
        }
        let xobjects: Dictionary = page
            .images
            .iter()
            .filter_map(|i| image_ids.get(*i).map(|&id| (image_resource(*i), Object::Reference(id))))
            .fold(Dictionary::new(), |mut d, (k, v)| {
                d.set(k, v);
                d
            });
        if !xobjects.is_empty() {
            resources.set("XObject", xobjects);
        }

        let content_id = doc.add_object(Stream::new(Dictionary::new(), page.content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![Object::Integer(0), Object::Integer(0), geometry.width.into(), geometry.height.into()],
            "Contents" => content_id,
            "Resources" => resources,
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
    let info_id = doc.add_object(dictionary! {
        "Title" => text_string(title),
        "Producer" => Object::string_literal(PRODUCER),
    });

    digest.update(title.as_bytes());
    let id = digest.finalize()[..16].to_vec();
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    doc.trailer.set(
        "ID",
        vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id, StringFormat::Hexadecimal),
        ],
    );

    doc.compress();
    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)
        .map_err(|e| ConvertError::render(format!("writing PDF: {e}")))?;
    Ok(PdfOutput {
        bytes,
        missing_glyphs,
    })
}

/// A one-page document showing `image` fitted into the content box and
/// centred.
pub fn image_page(image: &DecodedImage, geometry: &PageGeometry, title: &str) -> Result<Vec<u8>> {
    let (natural_w, natural_h) = image.natural_size();
    let (width, height) = fit(
        natural_w,
        natural_h,
        geometry.content_width(),
        geometry.content_height(),
    );
    let x = geometry.margin_left + (geometry.content_width() - width) / 2.0;
    let y = geometry.margin_bottom + (geometry.content_height() - height) / 2.0;
    let page = Page {
        elements: vec![Element::Image {
            x,
            y,
            width,
            height,
            image: 0,
        }],
    };
    write(&[page], std::slice::from_ref(image), None, geometry, title).map(|out| out.bytes)
}

fn font_resource(index: usize) -> String {
    format!("F{}", index + 1)
}

fn image_resource(index: usize) -> String {
    format!("Im{}", index + 1)
}

fn encode_page(
    page: &Page,
    fonts: Option<&FontSet>,
    usage: &mut GlyphUsage,
    missing: &mut BTreeSet<char>,
) -> Result<EncodedPage> {
    let mut ops = Vec::new();
    let mut used_fonts = BTreeSet::new();
    let mut used_images = BTreeSet::new();

    for element in &page.elements {
        match element {
            Element::Text {
                x,
                baseline,
                style,
                text,
            } => {
                let fonts = fonts.ok_or_else(|| ConvertError::render("text drawn without a font"))?;
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("BT", vec![]));
                push_text_state(&mut ops, style);
                ops.push(Operation::new("Td", vec![(*x).into(), (*baseline).into()]));
                for (font, codes) in glyph_runs(fonts, text, usage, missing) {
                    used_fonts.insert(font);
                    ops.push(Operation::new(
                        "Tf",
                        vec![Object::Name(font_resource(font).into_bytes()), style.size.into()],
                    ));
                    ops.push(Operation::new(
                        "Tj",
                        vec![Object::String(codes, StringFormat::Hexadecimal)],
                    ));
                }
                ops.push(Operation::new("ET", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            Element::Rule {
                x1,
                x2,
                y,
                thickness,
            } => {
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new("G", vec![0.6f32.into()]));
                ops.push(Operation::new("w", vec![(*thickness).into()]));
                ops.push(Operation::new("m", vec![(*x1).into(), (*y).into()]));
                ops.push(Operation::new("l", vec![(*x2).into(), (*y).into()]));
                ops.push(Operation::new("S", vec![]));
                ops.push(Operation::new("Q", vec![]));
            }
            Element::Image {
                x,
                y,
                width,
                height,
                image,
            } => {
                used_images.insert(*image);
                ops.push(Operation::new("q", vec![]));
                ops.push(Operation::new(
                    "cm",
                    vec![
                        (*width).into(),
                        Object::Integer(0),
                        Object::Integer(0),
                        (*height).into(),
                        (*x).into(),
                        (*y).into(),
                    ],
                ));
                ops.push(Operation::new(
                    "Do",
                    vec![Object::Name(image_resource(*image).into_bytes())],
                ));
                ops.push(Operation::new("Q", vec![]));
            }
        }
    }

    let content = Content { operations: ops }
        .encode()
        .map_err(|e| ConvertError::render(format!("encoding page content: {e}")))?;
    Ok(EncodedPage {
        content,
        fonts: used_fonts,
        images: used_images,
    })
}

fn push_text_state(ops: &mut Vec<Operation>, style: &TextStyle) {
    ops.push(Operation::new("g", vec![style.gray.into()]));
    if style.bold {
        ops.push(Operation::new("G", vec![style.gray.into()]));
        ops.push(Operation::new("w", vec![(style.size * BOLD_STROKE).into()]));
        ops.push(Operation::new("Tr", vec![Object::Integer(2)]));
    }
}

/// Split `text` into runs drawn from the same font, as two-byte glyph codes.
fn glyph_runs(
    fonts: &FontSet,
    text: &str,
    usage: &mut GlyphUsage,
    missing: &mut BTreeSet<char>,
) -> Vec<(usize, Vec<u8>)> {
    let mut runs: Vec<(usize, Vec<u8>)> = Vec::new();
    for c in text.chars() {
        let glyph = fonts.resolve(c);
        if glyph.gid == 0 {
            missing.insert(c);
            continue;
        }
        usage.entry(glyph.font).or_default().entry(glyph.gid).or_insert(c);
        match runs.last_mut() {
            Some((font, codes)) if *font == glyph.font => codes.extend_from_slice(&glyph.gid.to_be_bytes()),
            _ => runs.push((glyph.font, glyph.gid.to_be_bytes().to_vec())),
        }
    }
    runs
}

fn add_image(doc: &mut Document, image: &DecodedImage) -> Result<ObjectId> {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(image.width),
        "Height" => i64::from(image.height),
        "ColorSpace" => image.color_space.pdf_name(),
        "BitsPerComponent" => 8i64,
    };
    if let Some(ref alpha) = image.alpha {
        let mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => i64::from(image.width),
                "Height" => i64::from(image.height),
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8i64,
                "Filter" => "FlateDecode",
            },
            alpha.clone(),
        )
        .with_compression(false);
        dict.set("SMask", doc.add_object(mask));
    }
    let (filter, data) = match image.data {
        ImageData::Jpeg(ref bytes) => ("DCTDecode", bytes.clone()),
        ImageData::Flate(ref bytes) => ("FlateDecode", bytes.clone()),
    };
    dict.set("Filter", filter);
    Ok(doc.add_object(Stream::new(dict, data).with_compression(false)))
}

/// Embed the whole TrueType program and describe the glyphs in use.
fn embed_font(doc: &mut Document, font: &Font, glyphs: &BTreeMap<u16, char>) -> Result<ObjectId> {
    let program = Stream::new(
        dictionary! {
            "Length1" => font.data.len() as i64,
            "Filter" => "FlateDecode",
        },
        compress(&font.data)?,
    )
    .with_compression(false);
    let program_id = doc.add_object(program);

    let bbox: Vec<Object> = font.bbox.iter().map(|&v| font.scaled(v).into()).collect();
    // Nonsymbolic, plus FixedPitch when monospaced
    let flags: i64 = if font.is_monospaced { 32 | 1 } else { 32 };
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => font.name.as_str(),
        "Flags" => flags,
        "FontBBox" => bbox,
        "ItalicAngle" => font.italic_angle,
        "Ascent" => font.scaled(font.ascent),
        "Descent" => font.scaled(font.descent),
        "CapHeight" => font.scaled(font.cap_height),
        "StemV" => 80i64,
        "FontFile2" => program_id,
    });

    let mut widths = Vec::with_capacity(glyphs.len() * 2);
    for &gid in glyphs.keys() {
        widths.push(Object::Integer(i64::from(gid)));
        widths.push(Object::Array(vec![Object::Integer(font.pdf_width(gid))]));
    }
    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => font.name.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => Object::string_literal("Adobe"),
            "Ordering" => Object::string_literal("Identity"),
            "Supplement" => 0i64,
        },
        "FontDescriptor" => descriptor_id,
        "W" => widths,
        "CIDToGIDMap" => "Identity",
    });

    let to_unicode_id = doc.add_object(Stream::new(
        Dictionary::new(),
        to_unicode_cmap(glyphs).into_bytes(),
    ));

    Ok(doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => font.name.as_str(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![Object::Reference(cid_font_id)],
        "ToUnicode" => to_unicode_id,
    }))
}

fn to_unicode_cmap(glyphs: &BTreeMap<u16, char>) -> String {
    let entries: Vec<(u16, char)> = glyphs
        .iter()
        .filter(|(&gid, _)| gid != 0)
        .map(|(&gid, &c)| (gid, c))
        .collect();

    let mut out = String::from(
        "/CIDInit /ProcSet findresource begin\n\
         12 dict begin\n\
         begincmap\n\
         /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
         /CMapName /Adobe-Identity-UCS def\n\
         /CMapType 2 def\n\
         1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
    );
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, c) in chunk {
            let mut units = [0u16; 2];
            let hex: String = c
                .encode_utf16(&mut units)
                .iter()
                .map(|u| format!("{u:04X}"))
                .collect();
            out.push_str(&format!("<{gid:04X}> <{hex}>\n"));
        }
        out.push_str("endbfchar\n");
    }
    out.push_str("endcmap\nCMapName currentdict /CMap defineresource pop\nend\nend\n");
    out
}

/// PDF text string: literal for ASCII, UTF-16BE with a byte-order mark
/// otherwise.
fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        return Object::string_literal(text);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}
