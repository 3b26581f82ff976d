//! In-process Outlook `.msg` reader (MS-OXMSG over an OLE compound file).
//!
//! A message is a tree of storages. Each storage carries a fixed-size
//! property table (`__properties_version1.0`) and one stream per
//! variable-length property (`__substg1.0_IIIITTTT`, id and type in hex).
//! Recipients and attachments are child storages of the root.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use cfb::CompoundFile;
use chrono::DateTime;
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::address::{format_list, normalize_list};
use crate::model::{Attachment, EmailAddress, Message};
use crate::parser::mime::{parse_header_block, HeaderFields};
use crate::parser::msg::MsgBackend;
use crate::parser::rtf::{self, RtfBody};
use crate::parser::sniff;
use crate::sanitize::sanitize_header;

type Container<'a> = CompoundFile<Cursor<&'a [u8]>>;

const PROPERTIES_STREAM: &str = "__properties_version1.0";
const SUBSTG_PREFIX: &str = "__substg1.0_";
const RECIPIENT_PREFIX: &str = "__recip_version1.0_";
const ATTACHMENT_PREFIX: &str = "__attach_version1.0_";

/// Property table header length for the top-level message.
const ROOT_HEADER_LEN: usize = 32;
/// Property table header length for recipient and attachment storages.
const CHILD_HEADER_LEN: usize = 8;
const PROPERTY_ENTRY_LEN: usize = 16;

const PT_LONG: u16 = 0x0003;
const PT_BOOLEAN: u16 = 0x000B;
const PT_STRING8: u16 = 0x001E;
const PT_UNICODE: u16 = 0x001F;
const PT_SYSTIME: u16 = 0x0040;
const PT_BINARY: u16 = 0x0102;

const SUBJECT: u16 = 0x0037;
const CLIENT_SUBMIT_TIME: u16 = 0x0039;
const SENT_REPRESENTING_NAME: u16 = 0x0042;
const SENT_REPRESENTING_EMAIL: u16 = 0x0065;
const TRANSPORT_HEADERS: u16 = 0x007D;
const RECIPIENT_TYPE: u16 = 0x0C15;
const SENDER_NAME: u16 = 0x0C1A;
const SENDER_EMAIL: u16 = 0x0C1F;
const DISPLAY_CC: u16 = 0x0E03;
const DISPLAY_TO: u16 = 0x0E04;
const DELIVERY_TIME: u16 = 0x0E06;
const BODY: u16 = 0x1000;
const RTF_COMPRESSED: u16 = 0x1009;
const BODY_HTML: u16 = 0x1013;
const DISPLAY_NAME: u16 = 0x3001;
const EMAIL_ADDRESS: u16 = 0x3003;
const ATTACH_DATA: u16 = 0x3701;
const ATTACH_FILENAME: u16 = 0x3704;
const ATTACH_METHOD: u16 = 0x3705;
const ATTACH_LONG_FILENAME: u16 = 0x3707;
const ATTACH_MIME_TAG: u16 = 0x370E;
const ATTACH_CONTENT_ID: u16 = 0x3712;
const ATTACH_FLAGS: u16 = 0x3714;
const SMTP_ADDRESS: u16 = 0x39FE;
const INTERNET_CPID: u16 = 0x3FDE;
const MESSAGE_CODEPAGE: u16 = 0x3FFD;
const SENDER_SMTP: u16 = 0x5D01;
const SENT_REPRESENTING_SMTP: u16 = 0x5D02;
const ATTACHMENT_HIDDEN: u16 = 0x7FFE;

const RECIPIENT_CC: u32 = 2;
const RECIPIENT_BCC: u32 = 3;
const ATTACH_EMBEDDED_MESSAGE: u32 = 5;
/// `attMHTMLRef`: the attachment is referenced from the HTML body.
const ATT_MHTML_REF: u32 = 0x4;

/// 100ns intervals between 1601-01-01 and the Unix epoch.
const FILETIME_UNIX_OFFSET_SECS: i64 = 11_644_473_600;

/// Decodes `.msg` containers without leaving the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMsgBackend;

impl MsgBackend for NativeMsgBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Message> {
        panic::catch_unwind(AssertUnwindSafe(|| read_message(bytes))).unwrap_or_else(|_| {
            Err(ConvertError::parse(
                "OLE reader aborted on a malformed container",
            ))
        })
    }
}

fn read_message(bytes: &[u8]) -> Result<Message> {
    let mut container = CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| ConvertError::parse(format!("corrupt OLE container: {e}")))?;

    let root = PropertySet::load(&mut container, Path::new("/"), ROOT_HEADER_LEN)?;
    if root.is_empty() {
        return Err(ConvertError::parse(
            "OLE container holds no Outlook message properties",
        ));
    }

    let codepage = [INTERNET_CPID, MESSAGE_CODEPAGE]
        .iter()
        .filter_map(|&id| root.int(id))
        .find_map(|cp| rtf::codepage_encoding(cp as i32));
    let encoding = codepage.unwrap_or(WINDOWS_1252);

    let headers = root
        .string(TRANSPORT_HEADERS, encoding)
        .map(|h| parse_header_block(&h))
        .unwrap_or_default();

    let recipients = load_children(&mut container, RECIPIENT_PREFIX)?;
    let (to, cc) = recipient_lists(&root, &recipients, &headers, encoding);

    let attachments = load_children(&mut container, ATTACHMENT_PREFIX)?
        .iter()
        .enumerate()
        .filter_map(|(idx, props)| build_attachment(idx, props, encoding))
        .collect::<Vec<_>>();

    let from = Some(headers.from.clone())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| sender(&root, encoding));

    let date = root
        .time(CLIENT_SUBMIT_TIME)
        .or_else(|| root.time(DELIVERY_TIME))
        .or(headers.date);

    let (body_html, body_text) = bodies(&root, codepage);

    let message = Message {
        subject: root
            .string(SUBJECT, encoding)
            .map(|s| sanitize_header(&s))
            .unwrap_or_default(),
        from,
        to,
        cc,
        date,
        body_html,
        body_text,
        attachments,
    };
    debug!(
        subject = %message.subject,
        recipients = recipients.len(),
        attachments = message.attachments.len(),
        "Parsed Outlook message"
    );
    Ok(message)
}

fn sender(root: &PropertySet, encoding: &'static Encoding) -> String {
    let name = root
        .string(SENDER_NAME, encoding)
        .or_else(|| root.string(SENT_REPRESENTING_NAME, encoding))
        .unwrap_or_default();
    let address = smtp_address(
        root,
        &[SENDER_SMTP, SENT_REPRESENTING_SMTP, SENDER_EMAIL, SENT_REPRESENTING_EMAIL],
        encoding,
    );
    format_list(&[EmailAddress::new(sanitize_header(&name), address)])
}

/// First of `ids` that holds something shaped like an internet address.
/// Exchange-internal (`/O=ORG/OU=...`) addresses are skipped.
fn smtp_address(props: &PropertySet, ids: &[u16], encoding: &'static Encoding) -> String {
    ids.iter()
        .filter_map(|&id| props.string(id, encoding))
        .map(|a| a.trim().to_string())
        .find(|a| a.contains('@'))
        .unwrap_or_default()
}

fn recipient_lists(
    root: &PropertySet,
    recipients: &[PropertySet],
    headers: &HeaderFields,
    encoding: &'static Encoding,
) -> (String, String) {
    let mut to = Vec::new();
    let mut cc = Vec::new();
    for recipient in recipients {
        let name = recipient.string(DISPLAY_NAME, encoding).unwrap_or_default();
        let address = smtp_address(recipient, &[SMTP_ADDRESS, EMAIL_ADDRESS], encoding);
        let entry = EmailAddress::new(sanitize_header(&name), address);
        match recipient.int(RECIPIENT_TYPE) {
            Some(RECIPIENT_CC) => cc.push(entry),
            Some(RECIPIENT_BCC) => {}
            _ => to.push(entry),
        }
    }

    let pick = |list: &[EmailAddress], from_headers: &str, display: u16| {
        let formatted = format_list(list);
        if !formatted.is_empty() {
            return formatted;
        }
        if !from_headers.is_empty() {
            return from_headers.to_string();
        }
        root.string(display, encoding)
            .map(|d| normalize_list(&sanitize_header(&d)))
            .unwrap_or_default()
    };
    (
        pick(&to, &headers.to, DISPLAY_TO),
        pick(&cc, &headers.cc, DISPLAY_CC),
    )
}

/// HTML property, then HTML wrapped in the compressed RTF, then the plain
/// body, then whatever text the RTF holds.
fn bodies(root: &PropertySet, codepage: Option<&'static Encoding>) -> (Option<String>, Option<String>) {
    let non_empty = |s: String| Some(s).filter(|s| !s.trim().is_empty());
    let encoding = codepage.unwrap_or(WINDOWS_1252);

    let html = root
        .html(BODY_HTML, codepage.unwrap_or(UTF_8), encoding)
        .and_then(non_empty);
    let text = root.string(BODY, encoding).and_then(non_empty);

    let rtf = if html.is_none() {
        root.binary(RTF_COMPRESSED).and_then(|data| match rtf::decompress(data) {
            Ok(raw) => Some(rtf::extract_body(&raw)),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable compressed RTF body");
                None
            }
        })
    } else {
        None
    };

    let (html, text) = match (html, rtf) {
        (Some(html), _) => (Some(html), text),
        (None, Some(RtfBody::Html(html))) => (non_empty(html), text),
        (None, Some(RtfBody::Text(rtf_text))) => (None, text.or_else(|| non_empty(rtf_text))),
        (None, None) => (None, text),
    };
    match (html, text) {
        (None, None) => (None, Some(String::new())),
        pair => pair,
    }
}

fn build_attachment(idx: usize, props: &PropertySet, encoding: &'static Encoding) -> Option<Attachment> {
    let named = [ATTACH_LONG_FILENAME, ATTACH_FILENAME, DISPLAY_NAME]
        .iter()
        .filter_map(|&id| props.string(id, encoding))
        .map(|n| sanitize_header(&n))
        .find(|n| !n.is_empty());

    if props.int(ATTACH_METHOD) == Some(ATTACH_EMBEDDED_MESSAGE) || props.objects.contains(&ATTACH_DATA) {
        warn!(
            attachment = named.as_deref().unwrap_or("(unnamed)"),
            "Skipping embedded message attachment"
        );
        return None;
    }
    let Some(data) = props.binary(ATTACH_DATA) else {
        warn!(
            attachment = named.as_deref().unwrap_or("(unnamed)"),
            "Attachment has no data stream, skipping"
        );
        return None;
    };

    let declared = props.string(ATTACH_MIME_TAG, encoding);
    let content_type =
        sniff::resolve_content_type(declared.as_deref(), named.as_deref().unwrap_or(""), data);
    let filename = named.unwrap_or_else(|| {
        format!("attachment_{}.{}", idx + 1, sniff::extension_for(&content_type))
    });

    let inline = props.int(ATTACH_FLAGS).is_some_and(|f| f & ATT_MHTML_REF != 0)
        || props.bool(ATTACHMENT_HIDDEN);
    let content_id = props.string(ATTACH_CONTENT_ID, encoding);

    Some(Attachment::new(
        filename,
        &content_type,
        content_id.as_deref(),
        inline,
        data.to_vec(),
    ))
}

/// Property sets of the root's child storages whose names start with `prefix`,
/// in name order.
fn load_children(container: &mut Container<'_>, prefix: &str) -> Result<Vec<PropertySet>> {
    let mut paths: Vec<PathBuf> = container
        .read_root_storage()
        .filter(|e| e.is_storage() && e.name().starts_with(prefix))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| PropertySet::load(container, path, CHILD_HEADER_LEN))
        .collect()
}

fn read_stream(container: &mut Container<'_>, path: &Path) -> Result<Vec<u8>> {
    let unreadable = |e: std::io::Error| {
        ConvertError::parse(format!("unreadable stream {}: {e}", path.display()))
    };
    let mut stream = container.open_stream(path).map_err(unreadable)?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data).map_err(unreadable)?;
    Ok(data)
}

/// Properties of one storage.
#[derive(Debug, Default)]
struct PropertySet {
    /// Fixed-size values from the property table: id → (type, raw value).
    fixed: HashMap<u16, (u16, [u8; 8])>,
    /// Variable-size values from `__substg1.0_` streams: id → (type, data).
    variable: HashMap<u16, (u16, Vec<u8>)>,
    /// Ids stored as sub-storages (embedded objects).
    objects: HashSet<u16>,
}

impl PropertySet {
    fn load(container: &mut Container<'_>, storage: &Path, header_len: usize) -> Result<Self> {
        let entries: Vec<(String, PathBuf, bool)> = container
            .read_storage(storage)
            .map_err(|e| ConvertError::parse(format!("unreadable storage {}: {e}", storage.display())))?
            .map(|e| (e.name().to_string(), e.path().to_path_buf(), e.is_stream()))
            .collect();

        let mut set = Self::default();
        for (name, path, is_stream) in entries {
            if name == PROPERTIES_STREAM && is_stream {
                let table = read_stream(container, &path)?;
                set.read_table(&table, header_len);
            } else if let Some((id, kind)) = name.strip_prefix(SUBSTG_PREFIX).and_then(parse_tag) {
                if is_stream {
                    let data = read_stream(container, &path)?;
                    set.variable.insert(id, (kind, data));
                } else {
                    set.objects.insert(id);
                }
            }
        }
        Ok(set)
    }

    fn read_table(&mut self, table: &[u8], header_len: usize) {
        let Some(entries) = table.get(header_len..) else {
            warn!(len = table.len(), "Property table shorter than its header");
            return;
        };
        for entry in entries.chunks_exact(PROPERTY_ENTRY_LEN) {
            let tag = LittleEndian::read_u32(&entry[0..4]);
            let mut value = [0u8; 8];
            value.copy_from_slice(&entry[8..16]);
            self.fixed.insert((tag >> 16) as u16, (tag as u16, value));
        }
    }

    fn is_empty(&self) -> bool {
        self.fixed.is_empty() && self.variable.is_empty()
    }

    fn string(&self, id: u16, encoding: &'static Encoding) -> Option<String> {
        let (kind, data) = self.variable.get(&id)?;
        let text = match *kind {
            PT_UNICODE => decode_utf16le(data),
            PT_STRING8 => encoding.decode(data).0.into_owned(),
            _ => return None,
        };
        let text = text.trim_end_matches('\0').to_string();
        Some(text).filter(|t| !t.is_empty())
    }

    /// HTML may be stored as text or as bytes in the message's internet code page.
    fn html(
        &self,
        id: u16,
        bytes_encoding: &'static Encoding,
        string_encoding: &'static Encoding,
    ) -> Option<String> {
        match self.variable.get(&id)? {
            (PT_BINARY, data) => Some(
                bytes_encoding
                    .decode(data)
                    .0
                    .trim_end_matches('\0')
                    .to_string(),
            ),
            _ => self.string(id, string_encoding),
        }
    }

    fn binary(&self, id: u16) -> Option<&[u8]> {
        match self.variable.get(&id)? {
            (PT_BINARY, data) => Some(data.as_slice()),
            _ => None,
        }
    }

    fn int(&self, id: u16) -> Option<u32> {
        match self.fixed.get(&id)? {
            (PT_LONG, value) => Some(LittleEndian::read_u32(&value[0..4])),
            _ => None,
        }
    }

    fn bool(&self, id: u16) -> bool {
        matches!(self.fixed.get(&id), Some((PT_BOOLEAN, value)) if LittleEndian::read_u16(&value[0..2]) != 0)
    }

    /// FILETIME value as RFC 3339.
    fn time(&self, id: u16) -> Option<String> {
        let (PT_SYSTIME, value) = self.fixed.get(&id)? else {
            return None;
        };
        let ticks = LittleEndian::read_u64(value);
        if ticks == 0 {
            return None;
        }
        let secs = (ticks / 10_000_000) as i64 - FILETIME_UNIX_OFFSET_SECS;
        let nanos = (ticks % 10_000_000) as u32 * 100;
        DateTime::from_timestamp(secs, nanos).map(|dt| dt.to_rfc3339())
    }
}

/// `IIIITTTT` → (id, type). Multi-valued entries carry a `-NNNNNNNN` suffix
/// and are not used.
fn parse_tag(hex: &str) -> Option<(u16, u16)> {
    if hex.len() != 8 || !hex.is_ascii() {
        return None;
    }
    let id = u16::from_str_radix(&hex[0..4], 16).ok()?;
    let kind = u16::from_str_radix(&hex[4..8], 16).ok()?;
    Some((id, kind))
}

fn decode_utf16le(data: &[u8]) -> String {
    let units = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ErrorKind;

    fn utf16(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(u16::to_le_bytes).collect()
    }

    fn table(header_len: usize, entries: &[(u16, u16, u64)]) -> Vec<u8> {
        let mut out = vec![0u8; header_len];
        for &(id, kind, value) in entries {
            out.extend_from_slice(&((u32::from(id) << 16) | u32::from(kind)).to_le_bytes());
            out.extend_from_slice(&6u32.to_le_bytes());
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    struct Builder(CompoundFile<Cursor<Vec<u8>>>);

    impl Builder {
        fn new() -> Self {
            Self(CompoundFile::create(Cursor::new(Vec::new())).expect("create"))
        }

        fn stream(&mut self, path: &str, data: &[u8]) -> &mut Self {
            let mut stream = self.0.create_stream(path).expect("stream");
            stream.write_all(data).expect("write");
            self
        }

        fn storage(&mut self, path: &str) -> &mut Self {
            self.0.create_storage(path).expect("storage");
            self
        }

        fn finish(mut self) -> Vec<u8> {
            self.0.flush().expect("flush");
            self.0.into_inner().into_inner()
        }
    }

    /// 2025-07-02T08:30:00Z
    const SUBMIT_FILETIME: u64 = (1_751_445_000 + 11_644_473_600) * 10_000_000;

    fn sample() -> Vec<u8> {
        let mut b = Builder::new();
        b.stream(
            "/__properties_version1.0",
            &table(
                ROOT_HEADER_LEN,
                &[(CLIENT_SUBMIT_TIME, PT_SYSTIME, SUBMIT_FILETIME), (INTERNET_CPID, PT_LONG, 65001)],
            ),
        )
        .stream("/__substg1.0_0037001F", &utf16("Quarterly report"))
        .stream("/__substg1.0_0C1A001F", &utf16("Ann Example"))
        .stream("/__substg1.0_5D01001F", &utf16("ann@example.com"))
        .stream("/__substg1.0_1000001F", &utf16("Plain body"))
        .stream("/__substg1.0_10130102", "<p>Caf\u{e9} <img src=\"cid:logo\"></p>".as_bytes());

        b.storage("/__recip_version1.0_#00000000")
            .stream("/__recip_version1.0_#00000000/__properties_version1.0", &table(CHILD_HEADER_LEN, &[(RECIPIENT_TYPE, PT_LONG, 1)]))
            .stream("/__recip_version1.0_#00000000/__substg1.0_3001001F", &utf16("Bob"))
            .stream("/__recip_version1.0_#00000000/__substg1.0_39FE001F", &utf16("bob@example.com"));
        b.storage("/__recip_version1.0_#00000001")
            .stream("/__recip_version1.0_#00000001/__properties_version1.0", &table(CHILD_HEADER_LEN, &[(RECIPIENT_TYPE, PT_LONG, 2)]))
            .stream("/__recip_version1.0_#00000001/__substg1.0_3003001F", &utf16("carol@example.com"));

        b.storage("/__attach_version1.0_#00000000")
            .stream("/__attach_version1.0_#00000000/__properties_version1.0", &table(CHILD_HEADER_LEN, &[(ATTACH_METHOD, PT_LONG, 1)]))
            .stream("/__attach_version1.0_#00000000/__substg1.0_3707001F", &utf16("logo.png"))
            .stream("/__attach_version1.0_#00000000/__substg1.0_3712001F", &utf16("LOGO"))
            .stream("/__attach_version1.0_#00000000/__substg1.0_37010102", b"\x89PNG\r\n\x1a\n");
        b.storage("/__attach_version1.0_#00000001")
            .stream("/__attach_version1.0_#00000001/__properties_version1.0", &table(CHILD_HEADER_LEN, &[(ATTACH_METHOD, PT_LONG, 1)]))
            .stream("/__attach_version1.0_#00000001/__substg1.0_37010102", b"%PDF-1.4\n");
        b.finish()
    }

    #[test]
    fn test_reads_synthetic_message() {
        let msg = NativeMsgBackend.parse(&sample()).expect("parse");
        assert_eq!(msg.subject, "Quarterly report");
        assert_eq!(msg.from, "Ann Example <ann@example.com>");
        assert_eq!(msg.to, "Bob <bob@example.com>");
        assert_eq!(msg.cc, "carol@example.com");
        assert_eq!(msg.date.as_deref(), Some("2025-07-02T08:30:00+00:00"));
        assert_eq!(msg.body_html.as_deref(), Some("<p>Caf\u{e9} <img src=\"cid:logo\"></p>"));
        assert_eq!(msg.body_text.as_deref(), Some("Plain body"));

        assert_eq!(msg.attachments.len(), 2);
        let logo = &msg.attachments[0];
        assert_eq!(logo.filename, "logo.png");
        assert_eq!(logo.content_type, "image/png");
        assert_eq!(logo.content_id.as_deref(), Some("logo"));
        assert!(logo.is_inline);
        let pdf = &msg.attachments[1];
        assert_eq!(pdf.filename, "attachment_2.pdf");
        assert!(pdf.is_pdf());
        assert!(!pdf.is_inline);
    }

    #[test]
    fn test_rtf_only_body_recovers_html() {
        let rtf = b"{\\rtf1\\ansi\\fromhtml1 {\\*\\htmltag <p>}Hello{\\*\\htmltag </p>}}";
        let mut compressed = Vec::new();
        compressed.extend_from_slice(&((rtf.len() + 12) as u32).to_le_bytes());
        compressed.extend_from_slice(&(rtf.len() as u32).to_le_bytes());
        compressed.extend_from_slice(b"MELA");
        compressed.extend_from_slice(&0u32.to_le_bytes());
        compressed.extend_from_slice(rtf);

        let mut b = Builder::new();
        b.stream("/__properties_version1.0", &table(ROOT_HEADER_LEN, &[]))
            .stream("/__substg1.0_0037001E", b"RTF only\0")
            .stream("/__substg1.0_10090102", &compressed);
        let msg = NativeMsgBackend.parse(&b.finish()).expect("parse");
        assert_eq!(msg.subject, "RTF only");
        assert_eq!(msg.body_html.as_deref(), Some("<p>Hello</p>"));
        assert!(msg.body_text.is_none());
    }

    #[test]
    fn test_empty_container_is_parse_error() {
        let err = NativeMsgBackend.parse(&Builder::new().finish()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_corrupted_container_is_parse_error() {
        let mut bytes = sample();
        for b in bytes.iter_mut().skip(512) {
            *b = 0xFF;
        }
        let err = NativeMsgBackend.parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);

        let mut truncated = sniff::OLE_SIGNATURE.to_vec();
        truncated.extend_from_slice(&[0u8; 100]);
        assert_eq!(NativeMsgBackend.parse(&truncated).unwrap_err().kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("0037001F"), Some((0x0037, 0x001F)));
        assert_eq!(parse_tag("37010102"), Some((0x3701, 0x0102)));
        assert_eq!(parse_tag("1000101F-00000000"), None);
        assert_eq!(parse_tag("zzzz001F"), None);
    }

    #[test]
    fn test_decode_utf16le() {
        assert_eq!(decode_utf16le(&utf16("Привет")), "Привет");
        assert_eq!(decode_utf16le(&[0x00, 0xD8]), "\u{FFFD}");
    }
}
