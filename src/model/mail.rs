//! The normalized message record.

use serde::Serialize;

use super::attachment::{normalize_content_id, Attachment};

/// One email after normalization, independent of its container format.
///
/// Produced once per conversion by the normalizer and never mutated
/// afterwards; every later stage only borrows it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Message {
    /// Decoded subject (may be empty).
    pub subject: String,

    /// Display-formatted address lists (`"Name <addr>, other@host"`).
    pub from: String,
    pub to: String,
    pub cc: String,

    /// RFC 3339 date, or `None` when the header was missing or unparsable.
    pub date: Option<String>,

    #[serde(rename = "bodyHtml")]
    pub body_html: Option<String>,

    #[serde(rename = "bodyText")]
    pub body_text: Option<String>,

    /// Every non-body part, in source order.
    pub attachments: Vec<Attachment>,
}

impl Message {
    /// Find an attachment by content-id, in any case or bracket form.
    pub fn find_inline(&self, content_id: &str) -> Option<&Attachment> {
        let wanted = normalize_content_id(content_id)?;
        self.attachments
            .iter()
            .find(|a| a.content_id.as_deref() == Some(wanted.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with(ids: &[&str]) -> Message {
        Message {
            attachments: ids
                .iter()
                .map(|id| Attachment::new("x.png", "image/png", Some(id), false, Vec::new()))
                .collect(),
            ..Message::default()
        }
    }

    #[test]
    fn test_find_inline_any_form() {
        let msg = message_with(&["<Img1>"]);
        assert!(msg.find_inline("img1").is_some());
        assert!(msg.find_inline("cid:IMG1").is_some());
        assert!(msg.find_inline("<img1>").is_some());
        assert!(msg.find_inline("img2").is_none());
    }

    #[test]
    fn test_find_inline_empty_id() {
        let msg = message_with(&["a"]);
        assert!(msg.find_inline("").is_none());
    }
}
