//! Message Normalizer: raw `.eml` / `.msg` bytes to one canonical [`Message`].

pub mod collaborator;
pub mod header;
pub mod mime;
pub mod msg;
pub mod outlook;
pub mod rtf;
pub mod sniff;

use serde::Serialize;
use tracing::debug;

use crate::config::MsgConfig;
use crate::error::{ConvertError, Result};
use crate::model::Message;
use msg::MsgBackend;

/// Container format implied by the declared filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Mime,
    Ole,
    /// No usable extension: try MIME, then sniff for OLE.
    Ambiguous,
}

/// Which backend actually produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Eml,
    Msg,
}

/// Classify an upload by its filename extension.
pub fn detect_format(filename: &str) -> Result<SourceFormat> {
    match sniff::extension(filename).as_deref() {
        Some("eml" | "mime" | "mht" | "mhtml") => Ok(SourceFormat::Mime),
        Some("msg" | "oft") => Ok(SourceFormat::Ole),
        None | Some("bin" | "dat" | "tmp") => Ok(SourceFormat::Ambiguous),
        Some(other) => Err(ConvertError::parse(format!(
            "unsupported extension '.{other}'"
        ))),
    }
}

/// Converts uploads into the canonical record.
pub struct Normalizer {
    msg_backend: Box<dyn MsgBackend>,
}

impl Normalizer {
    pub fn new(msg_backend: Box<dyn MsgBackend>) -> Self {
        Self { msg_backend }
    }

    pub fn from_config(config: &MsgConfig) -> Self {
        Self::new(msg::backend_from_config(config))
    }

    pub fn normalize(&self, bytes: &[u8], filename: &str) -> Result<Message> {
        self.normalize_with_source(bytes, filename)
            .map(|(message, _)| message)
    }

    /// Like [`normalize`](Self::normalize), also reporting which path decoded it.
    pub fn normalize_with_source(&self, bytes: &[u8], filename: &str) -> Result<(Message, Source)> {
        let format = detect_format(filename)?;
        debug!(filename, ?format, size = bytes.len(), "Normalizing");

        match format {
            SourceFormat::Mime => mime::parse_mime(bytes).map(|m| (m, Source::Eml)),
            SourceFormat::Ole => self.parse_ole(bytes).map(|m| (m, Source::Msg)),
            SourceFormat::Ambiguous => match mime::parse_mime(bytes) {
                Ok(message) => Ok((message, Source::Eml)),
                Err(ConvertError::Parse(reason)) if sniff::is_ole(bytes) => {
                    debug!(%reason, "Not MIME, found OLE signature");
                    self.parse_ole(bytes).map(|m| (m, Source::Msg))
                }
                Err(e) => Err(e),
            },
        }
    }

    fn parse_ole(&self, bytes: &[u8]) -> Result<Message> {
        msg::parse_msg(bytes, self.msg_backend.as_ref())
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(Box::new(outlook::NativeMsgBackend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format("a.EML").unwrap(), SourceFormat::Mime);
        assert_eq!(detect_format("page.mht").unwrap(), SourceFormat::Mime);
        assert_eq!(detect_format("b.msg").unwrap(), SourceFormat::Ole);
        assert_eq!(detect_format("upload").unwrap(), SourceFormat::Ambiguous);
        assert_eq!(detect_format("upload.bin").unwrap(), SourceFormat::Ambiguous);
        let err = detect_format("notes.docx").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.to_string().contains(".docx"));
    }

    #[test]
    fn test_ambiguous_prefers_mime() {
        let (msg, source) = Normalizer::default()
            .normalize_with_source(b"Subject: Hi\r\n\r\nbody", "upload")
            .expect("normalize");
        assert_eq!(source, Source::Eml);
        assert_eq!(msg.subject, "Hi");
    }

    #[test]
    fn test_ambiguous_falls_back_to_ole() {
        let mut bytes = sniff::OLE_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        // The OLE path is taken; the truncated container then fails there
        let err = Normalizer::default().normalize(&bytes, "upload.dat").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert!(err.to_string().contains("OLE"));
    }

    #[test]
    fn test_msg_extension_requires_signature() {
        let err = Normalizer::default()
            .normalize(b"Subject: x\r\n\r\n", "mail.msg")
            .unwrap_err();
        assert_eq!(err.to_string(), "Parse error: corrupt OLE signature");
    }
}
