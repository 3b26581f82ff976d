//! Document Renderer: lays a [`Message`] out on pages and writes the PDF.
//!
//! Composition and serialization are separate steps. [`compose`] turns a
//! message into positioned page elements using any [`TextMeasure`], so it
//! can be exercised without fonts; [`Renderer`] pairs it with the loaded
//! [`FontSet`] and the PDF writer.

pub mod font;
pub mod image;
pub mod layout;
pub mod pdf;

use std::collections::{BTreeMap, BTreeSet};

use chrono::DateTime;
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::error::Result;
use crate::model::Message;
use crate::sanitize::sanitize;
use crate::tokenize::{tokenize, BodyToken};
use self::font::FontSet;
use self::image::DecodedImage;
use self::layout::{Layout, Page, PageGeometry, TextMeasure, TextStyle};

pub const NO_SUBJECT: &str = "(no subject)";
pub const NO_BODY: &str = "(no message body)";

/// Gap around inline images and below the subject, in points.
const BLOCK_GAP: f32 = 4.0;

/// Output of [`Renderer::render`].
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub page_count: usize,
    /// Normalized content-ids drawn inline in the body.
    pub consumed_content_ids: BTreeSet<String>,
}

/// Laid-out pages before serialization.
#[derive(Debug)]
pub struct Composition {
    pub pages: Vec<Page>,
    pub images: Vec<DecodedImage>,
    pub consumed_content_ids: BTreeSet<String>,
}

/// Body content chosen for a message.
enum Body {
    Html(Vec<BodyToken>),
    Text(String),
    Empty,
}

fn select_body(message: &Message) -> Body {
    if let Some(ref html) = message.body_html {
        let tokens: Vec<BodyToken> = tokenize(html).collect();
        let visible = tokens.iter().any(|t| match t {
            BodyToken::Image { content_id } => message.find_inline(content_id).is_some(),
            BodyToken::Text(s) => !s.trim().is_empty(),
        });
        if visible {
            return Body::Html(tokens);
        }
        debug!("HTML body has no visible content, falling back to text");
    }
    match message.body_text.as_deref().map(sanitize) {
        Some(text) if !text.trim().is_empty() => Body::Text(text.trim_end().to_string()),
        _ => Body::Empty,
    }
}

/// Display form of the normalized date; unparsable values are shown as-is.
fn display_date(date: &str) -> String {
    DateTime::parse_from_rfc3339(date)
        .map(|d| d.format("%a, %d %b %Y %H:%M:%S %z").to_string())
        .unwrap_or_else(|_| date.to_string())
}

struct Styles {
    subject: TextStyle,
    header: TextStyle,
    body: TextStyle,
    placeholder: TextStyle,
}

impl Styles {
    fn from_config(config: &RenderConfig) -> Self {
        let body = TextStyle {
            size: config.font_size,
            line_height: config.line_height,
            bold: false,
            gray: 0.0,
        };
        Self {
            subject: TextStyle {
                size: config.subject_size,
                line_height: config.subject_line_height,
                bold: true,
                gray: 0.0,
            },
            header: TextStyle {
                size: config.header_size,
                line_height: config.header_line_height,
                bold: false,
                gray: 0.25,
            },
            body,
            placeholder: TextStyle { gray: 0.5, ..body },
        }
    }
}

/// Lay out header block, divider and body.
pub fn compose<M: TextMeasure + ?Sized>(
    message: &Message,
    measure: &M,
    config: &RenderConfig,
) -> Composition {
    let styles = Styles::from_config(config);
    let mut layout = Layout::new(measure, PageGeometry::from_config(config));

    let subject = if message.subject.trim().is_empty() {
        NO_SUBJECT
    } else {
        message.subject.as_str()
    };
    layout.text(subject, styles.subject);
    layout.space(BLOCK_GAP);

    let date = message.date.as_deref().map(display_date).unwrap_or_default();
    let fields = [
        ("From", message.from.as_str()),
        ("To", message.to.as_str()),
        ("Cc", message.cc.as_str()),
        ("Date", date.as_str()),
    ];
    for (label, value) in fields {
        if !value.trim().is_empty() {
            layout.text(&format!("{label}: {value}"), styles.header);
        }
    }
    layout.rule(0.75, 8.0);

    let mut images = Vec::new();
    let mut consumed = BTreeSet::new();
    match select_body(message) {
        Body::Html(tokens) => {
            // content-id -> index into `images`, None when undrawable
            let mut cache: BTreeMap<String, Option<usize>> = BTreeMap::new();
            for token in tokens {
                match token {
                    BodyToken::Text(text) => layout.text(&text, styles.body),
                    BodyToken::Image { content_id } => {
                        let index = *cache
                            .entry(content_id.clone())
                            .or_insert_with(|| load_inline(message, &content_id, &mut images));
                        let Some(index) = index else {
                            continue;
                        };
                        let (width, height) = images[index].natural_size();
                        layout.space(BLOCK_GAP);
                        layout.image(index, width, height, config.image_max_height);
                        layout.space(BLOCK_GAP);
                        consumed.insert(content_id);
                    }
                }
            }
        }
        Body::Text(text) => layout.text(&text, styles.body),
        Body::Empty => layout.text(NO_BODY, styles.placeholder),
    }

    Composition {
        pages: layout.finish(),
        images,
        consumed_content_ids: consumed,
    }
}

fn load_inline(message: &Message, content_id: &str, images: &mut Vec<DecodedImage>) -> Option<usize> {
    let Some(attachment) = message.find_inline(content_id) else {
        debug!(content_id, "Inline image not found, skipping");
        return None;
    };
    match self::image::decode(&attachment.bytes) {
        Ok(decoded) => {
            images.push(decoded);
            Some(images.len() - 1)
        }
        Err(e) => {
            warn!(
                content_id,
                filename = %attachment.filename,
                error = %e,
                "Skipping undecodable inline image"
            );
            None
        }
    }
}

/// Renders messages with one set of fonts. Immutable once built, so one
/// instance can serve concurrent conversions.
#[derive(Debug)]
pub struct Renderer {
    config: RenderConfig,
    fonts: FontSet,
}

impl Renderer {
    pub fn new(config: RenderConfig, fonts: FontSet) -> Self {
        Self { config, fonts }
    }

    /// Resolve fonts once from the configuration.
    pub fn from_config(config: &RenderConfig) -> Result<Self> {
        Ok(Self::new(config.clone(), FontSet::discover(config)?))
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn geometry(&self) -> PageGeometry {
        PageGeometry::from_config(&self.config)
    }

    pub fn fonts(&self) -> &FontSet {
        &self.fonts
    }

    pub fn render(&self, message: &Message) -> Result<RenderedDocument> {
        let composition = compose(message, &self.fonts, &self.config);
        let page_count = composition.pages.len();
        let title = if message.subject.is_empty() {
            NO_SUBJECT
        } else {
            message.subject.as_str()
        };

        let output = pdf::write(
            &composition.pages,
            &composition.images,
            Some(&self.fonts),
            &self.geometry(),
            title,
        )?;
        if !output.missing_glyphs.is_empty() {
            let sample: String = output.missing_glyphs.iter().take(16).collect();
            warn!(
                count = output.missing_glyphs.len(),
                sample = %sample,
                "Characters with no glyph in any loaded font"
            );
        }
        debug!(
            pages = page_count,
            images = composition.images.len(),
            bytes = output.bytes.len(),
            "Rendered message"
        );

        Ok(RenderedDocument {
            bytes: output.bytes,
            page_count,
            consumed_content_ids: composition.consumed_content_ids,
        })
    }
}
