//! MIME (`.eml`) backend: structural checks, header fields, body parts and
//! attachments, all read through `mail-parser`.

use mail_parser::{Address, HeaderName, MessageParser, MimeHeaders, PartType};
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::model::{Attachment, EmailAddress, Message};
use crate::model::address::format_list;
use crate::parser::header::normalize_date;
use crate::parser::sniff;
use crate::sanitize::sanitize_header;

/// How far into the input the header block is checked for binary data.
const HEADER_PROBE_LEN: usize = 8 * 1024;

/// Parse a complete MIME message into the canonical record.
pub fn parse_mime(raw: &[u8]) -> Result<Message> {
    let bytes = skip_from_line(raw);
    check_structure(bytes)?;

    let parsed = MessageParser::default()
        .parse(bytes)
        .ok_or_else(|| ConvertError::parse("truncated MIME: no header block found"))?;

    if !parsed.headers().iter().any(|h| !h.name.is_other()) {
        return Err(ConvertError::parse("not a MIME message: no recognised header"));
    }

    let date = match parsed.date() {
        Some(dt) if dt.is_valid() => normalize_date(&dt.to_rfc3339()),
        _ => parsed
            .header_raw(HeaderName::Date)
            .and_then(|raw| normalize_date(raw.trim())),
    };

    let attachments = parsed
        .attachments()
        .enumerate()
        .map(|(idx, part)| build_attachment(idx, part))
        .collect::<Vec<_>>();

    let message = Message {
        subject: parsed.subject().map(sanitize_header).unwrap_or_default(),
        from: format_addresses(parsed.from()),
        to: format_addresses(parsed.to()),
        cc: format_addresses(parsed.cc()),
        date,
        body_html: first_html(&parsed),
        body_text: first_text(&parsed),
        attachments,
    };

    debug!(
        subject = %message.subject,
        has_html = message.body_html.is_some(),
        has_text = message.body_text.is_some(),
        attachments = message.attachments.len(),
        "Parsed MIME message"
    );
    Ok(message)
}

/// Header fields recovered from a bare header block (e.g. transport headers
/// stored inside an Outlook message).
#[derive(Debug, Default, Clone)]
pub struct HeaderFields {
    pub from: String,
    pub to: String,
    pub cc: String,
    pub date: Option<String>,
}

pub fn parse_header_block(text: &str) -> HeaderFields {
    let Some(parsed) = MessageParser::default().parse_headers(text.as_bytes()) else {
        return HeaderFields::default();
    };
    let date = parsed
        .date()
        .filter(|dt| dt.is_valid())
        .and_then(|dt| normalize_date(&dt.to_rfc3339()));
    HeaderFields {
        from: format_addresses(parsed.from()),
        to: format_addresses(parsed.to()),
        cc: format_addresses(parsed.cc()),
        date,
    }
}

/// Reject input that cannot be a MIME message before handing it to the parser,
/// which otherwise accepts almost anything.
fn check_structure(bytes: &[u8]) -> Result<()> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ConvertError::parse("empty input"));
    }
    let probe = &bytes[..bytes.len().min(HEADER_PROBE_LEN)];
    let header_end = find_header_end(probe).unwrap_or(probe.len());
    if probe[..header_end].contains(&0) {
        return Err(ConvertError::parse("binary data where MIME headers were expected"));
    }
    Ok(())
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    let lf = data.windows(2).position(|w| w == b"\n\n");
    let crlf = data.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn format_addresses(address: Option<&Address<'_>>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    let to_email = |a: &mail_parser::Addr<'_>| {
        EmailAddress::new(
            sanitize_header(a.name.as_deref().unwrap_or("")),
            a.address.as_deref().unwrap_or("").trim(),
        )
    };
    let list: Vec<EmailAddress> = match address {
        Address::List(addrs) => addrs.iter().map(to_email).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter())
            .map(to_email)
            .collect(),
    };
    format_list(&list)
}

/// First genuine `text/html` body part. `mail-parser` synthesises HTML from
/// plain text when none exists; those conversions are ignored.
fn first_html(parsed: &mail_parser::Message<'_>) -> Option<String> {
    parsed.html_body.iter().find_map(|&id| match &parsed.parts.get(id)?.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    })
}

fn first_text(parsed: &mail_parser::Message<'_>) -> Option<String> {
    parsed.text_body.iter().find_map(|&id| match &parsed.parts.get(id)?.body {
        PartType::Text(text) => Some(text.to_string()),
        _ => None,
    })
}

fn build_attachment(idx: usize, part: &mail_parser::MessagePart<'_>) -> Attachment {
    let bytes = part.contents().to_vec();

    let declared = part.content_type().map(|ct| match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub),
        None => ct.ctype().to_string(),
    });
    let declared = match (&part.body, declared) {
        (PartType::Message(_), None) => Some("message/rfc822".to_string()),
        (_, declared) => declared,
    };

    let named = part
        .attachment_name()
        .map(sanitize_header)
        .filter(|n| !n.is_empty());
    let content_type = sniff::resolve_content_type(
        declared.as_deref(),
        named.as_deref().unwrap_or(""),
        &bytes,
    );
    let filename = named.unwrap_or_else(|| {
        let generated = format!(
            "attachment_{}.{}",
            idx + 1,
            sniff::extension_for(&content_type)
        );
        warn!(filename = %generated, "Attachment has no filename");
        generated
    });

    let inline = part.content_disposition().is_some_and(|d| d.is_inline());

    Attachment::new(filename, &content_type, part.content_id(), inline, bytes)
}

/// Skip a leading BOM and an mbox `From ` separator line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
