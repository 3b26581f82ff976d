//! Outlook `.msg` path: signature check, backend selection and the JSON
//! record exchanged with the external collaborator.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{MsgBackendKind, MsgConfig};
use crate::error::{ConvertError, Result};
use crate::model::address::normalize_list;
use crate::model::{Attachment, Message};
use crate::parser::collaborator::CommandMsgBackend;
use crate::parser::header::{decode_base64, decode_encoded_words, normalize_date};
use crate::parser::outlook::NativeMsgBackend;
use crate::parser::sniff;
use crate::sanitize::sanitize_header;

/// Decoder for OLE compound `.msg` containers.
pub trait MsgBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decode a `.msg` whose OLE signature has already been checked.
    fn parse(&self, bytes: &[u8]) -> Result<Message>;
}

/// Build the backend selected in the configuration.
pub fn backend_from_config(config: &MsgConfig) -> Box<dyn MsgBackend> {
    match config.backend {
        MsgBackendKind::Native => Box::new(NativeMsgBackend),
        MsgBackendKind::Command => Box::new(CommandMsgBackend::from_config(config)),
    }
}

/// Check the OLE signature, then decode with `backend`.
pub fn parse_msg(bytes: &[u8], backend: &dyn MsgBackend) -> Result<Message> {
    if !sniff::is_ole(bytes) {
        return Err(ConvertError::parse("corrupt OLE signature"));
    }
    debug!(backend = backend.name(), size = bytes.len(), "Decoding .msg");
    backend.parse(bytes)
}

/// Message record as emitted by an external `.msg` parser.
///
/// Collaborators disagree on field names; every known spelling is accepted
/// here and nowhere else.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MsgRecord {
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub date: Option<String>,
    #[serde(alias = "bodyHtml", alias = "html")]
    pub body_html: Option<String>,
    #[serde(alias = "bodyText", alias = "text", alias = "body")]
    pub body_text: Option<String>,
    pub attachments: Vec<MsgAttachmentRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MsgAttachmentRecord {
    #[serde(alias = "fileName", alias = "name")]
    pub filename: Option<String>,
    #[serde(rename = "contentType", alias = "content_type", alias = "mimeType")]
    pub content_type: Option<String>,
    #[serde(rename = "contentId", alias = "content_id", alias = "cid")]
    pub content_id: Option<String>,
    #[serde(rename = "isInline", alias = "is_inline", alias = "inline")]
    pub is_inline: Option<bool>,
    #[serde(
        rename = "dataBase64",
        alias = "data_b64",
        alias = "dataB64",
        alias = "data_base64",
        alias = "_content",
        alias = "data"
    )]
    pub data_base64: Option<String>,
}

impl MsgRecord {
    /// Decode collaborator stdout.
    ///
    /// Accepts the bare record or one wrapped as `{"meta": .., "message": ..}`;
    /// `{"ok": false, "error": ..}` is the collaborator declining the input.
    pub fn from_json(stdout: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(stdout)
            .map_err(|e| ConvertError::Subprocess(format!("invalid JSON from MSG parser: {e}")))?;

        if value.get("ok").and_then(serde_json::Value::as_bool) == Some(false) {
            let detail = value
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("MSG parser rejected the input");
            return Err(ConvertError::parse(detail.to_string()));
        }

        let record = match value.get("message") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        serde_json::from_value(record)
            .map_err(|e| ConvertError::Subprocess(format!("unexpected MSG parser output: {e}")))
    }

    /// Normalize into the canonical record.
    pub fn into_message(self) -> Message {
        let header = |v: Option<String>| sanitize_header(&decode_encoded_words(&v.unwrap_or_default()));
        let address = |v: Option<String>| normalize_list(&header(v));
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let attachments = self
            .attachments
            .into_iter()
            .enumerate()
            .filter_map(|(idx, a)| a.into_attachment(idx))
            .collect();

        let mut body_html = non_empty(self.body_html);
        let mut body_text = non_empty(self.body_text);
        if body_html.is_none() && body_text.is_none() {
            body_text = Some(String::new());
        }
        // Some collaborators put HTML into the text field
        if body_html.is_none() && body_text.as_deref().is_some_and(looks_like_html) {
            body_html = body_text.take();
        }

        Message {
            subject: header(self.subject),
            from: address(self.from),
            to: address(self.to),
            cc: address(self.cc),
            date: non_empty(self.date).and_then(|d| normalize_date(&d)),
            body_html,
            body_text,
            attachments,
        }
    }
}

impl MsgAttachmentRecord {
    fn into_attachment(self, idx: usize) -> Option<Attachment> {
        let label = self.filename.clone().unwrap_or_else(|| format!("#{}", idx + 1));
        let Some(encoded) = self.data_base64 else {
            warn!(attachment = %label, "Attachment has no data, skipping");
            return None;
        };
        let Some(bytes) = decode_base64(&encoded) else {
            warn!(attachment = %label, "Attachment data is not valid base64, skipping");
            return None;
        };

        let named = self
            .filename
            .map(|n| sanitize_header(&decode_encoded_words(&n)))
            .filter(|n| !n.is_empty());
        let content_type =
            sniff::resolve_content_type(self.content_type.as_deref(), named.as_deref().unwrap_or(""), &bytes);
        let filename = named.unwrap_or_else(|| {
            format!("attachment_{}.{}", idx + 1, sniff::extension_for(&content_type))
        });

        Some(Attachment::new(
            filename,
            &content_type,
            self.content_id.as_deref(),
            self.is_inline.unwrap_or(false),
            bytes,
        ))
    }
}

fn looks_like_html(text: &str) -> bool {
    let head: String = text.trim_start().chars().take(256).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.contains("<body")
}
