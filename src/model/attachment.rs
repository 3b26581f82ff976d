//! Attachment record and content-id normalization.
//!
//! Content-ids are compared in three places (attachment construction, body
//! tokenization, renderer lookup). All three go through
//! [`normalize_content_id`] so that `<IMG1@Host>`, `cid:img1@host` and
//! ` img1@host ` resolve to the same part.

use serde::{Serialize, Serializer};

/// Default type when a backend reports none.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// One attachment of a message, with its decoded payload.
///
/// Built only through [`Attachment::new`] so that the content type and
/// content-id are always in normalized form.
#[derive(Debug, Clone, Serialize)]
pub struct Attachment {
    /// Filename. Generated if missing from the source.
    pub filename: String,

    /// Lower-cased MIME type (e.g. `"image/png"`).
    #[serde(rename = "contentType")]
    pub content_type: String,

    /// Normalized content-id, present for parts referenced from the HTML body.
    #[serde(rename = "contentId")]
    pub content_id: Option<String>,

    /// `true` when a content-id is present or the part was marked inline.
    #[serde(rename = "isInline")]
    pub is_inline: bool,

    /// Decoded payload. Reported as a byte count when serialized.
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(
        filename: impl Into<String>,
        content_type: &str,
        content_id: Option<&str>,
        disposition_inline: bool,
        bytes: Vec<u8>,
    ) -> Self {
        let content_id = content_id.and_then(normalize_content_id);
        Self {
            filename: filename.into(),
            content_type: normalize_content_type(content_type),
            is_inline: content_id.is_some() || disposition_inline,
            content_id,
            bytes,
        }
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type == "application/pdf" || self.filename.to_ascii_lowercase().ends_with(".pdf")
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Normalize a content-id for comparison.
///
/// Strips a leading `cid:` (any case), angle brackets and all whitespace,
/// then lower-cases. Returns `None` when nothing is left.
pub fn normalize_content_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let without_scheme = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("cid:") => &trimmed[4..],
        _ => trimmed,
    };

    let normalized: String = without_scheme
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '<' && *c != '>')
        .flat_map(char::to_lowercase)
        .collect();

    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Lower-case a MIME type, drop parameters, and default to octet-stream.
pub fn normalize_content_type(raw: &str) -> String {
    let essence = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if essence.is_empty() || !essence.contains('/') {
        OCTET_STREAM.to_string()
    } else {
        essence
    }
}

fn serialize_len<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(bytes.len() as u64)
}
