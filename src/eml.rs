//! Write a [`Message`] back out as an RFC 5322 `.eml` file.
//!
//! Used to turn Outlook `.msg` items into plain MIME. Every body part is
//! UTF-8 and base64 encoded, so boundaries only need to avoid the base64
//! alphabet. Part layout:
//!
//! ```text
//! multipart/mixed            (only with regular attachments)
//!   multipart/related        (only with an HTML body and inline images)
//!     multipart/alternative  (only with both bodies)
//!       text/plain
//!       text/html
//!     image/* ...            (Content-ID, inline)
//!   application/* ...        (attachment)
//! ```

use base64::Engine;
use chrono::DateTime;

use crate::model::{Attachment, EmailAddress, Message};

/// RFC 5322 line limit for base64 bodies.
const LINE_LEN: usize = 76;
/// UTF-8 bytes per encoded word, keeping each word under 75 characters.
const WORD_BYTES: usize = 45;

enum Part<'a> {
    Leaf {
        headers: Vec<String>,
        body: &'a [u8],
    },
    Multipart {
        subtype: &'static str,
        parts: Vec<Part<'a>>,
    },
}

/// Serialize `message` as MIME with CRLF line endings.
pub fn to_eml(message: &Message) -> Vec<u8> {
    let mut out = String::new();

    for (name, value) in [("From", &message.from), ("To", &message.to), ("Cc", &message.cc)] {
        if !value.trim().is_empty() {
            out.push_str(&format!("{name}: {}\r\n", address_header(value)));
        }
    }
    if !message.subject.is_empty() {
        out.push_str(&format!("Subject: {}\r\n", encode_words(&message.subject)));
    }
    if let Some(ref date) = message.date {
        match DateTime::parse_from_rfc3339(date) {
            Ok(parsed) => out.push_str(&format!("Date: {}\r\n", parsed.to_rfc2822())),
            Err(_) => out.push_str(&format!("Date: {}\r\n", encode_words(date))),
        }
    }
    out.push_str("MIME-Version: 1.0\r\n");

    let mut boundaries = 0;
    write_part(&mut out, &structure(message), &mut boundaries);
    out.into_bytes()
}

fn structure(message: &Message) -> Part<'_> {
    let text = message.body_text.as_deref().map(|t| text_part("plain", t));
    let html = message.body_html.as_deref().map(|h| text_part("html", h));
    let has_html = html.is_some();

    let mut body = match (text, html) {
        (Some(text), Some(html)) => Part::Multipart {
            subtype: "alternative",
            parts: vec![text, html],
        },
        (Some(part), None) | (None, Some(part)) => part,
        (None, None) => text_part("plain", ""),
    };

    let (inline, attached): (Vec<&Attachment>, Vec<&Attachment>) = message
        .attachments
        .iter()
        .partition(|a| has_html && a.content_id.is_some());

    if !inline.is_empty() {
        let mut parts = vec![body];
        parts.extend(inline.into_iter().map(|a| attachment_part(a, true)));
        body = Part::Multipart {
            subtype: "related",
            parts,
        };
    }
    if attached.is_empty() {
        return body;
    }
    let mut parts = vec![body];
    parts.extend(attached.into_iter().map(|a| attachment_part(a, false)));
    Part::Multipart {
        subtype: "mixed",
        parts,
    }
}

fn text_part<'a>(subtype: &str, body: &'a str) -> Part<'a> {
    Part::Leaf {
        headers: vec![
            format!("Content-Type: text/{subtype}; charset=utf-8"),
            "Content-Transfer-Encoding: base64".to_string(),
        ],
        body: body.as_bytes(),
    }
}

fn attachment_part(attachment: &Attachment, inline: bool) -> Part<'_> {
    let (name, filename) = filename_params(&attachment.filename);
    let disposition = if inline { "inline" } else { "attachment" };
    let mut headers = vec![
        format!("Content-Type: {}; {name}", attachment.content_type),
        format!("Content-Disposition: {disposition}; {filename}"),
        "Content-Transfer-Encoding: base64".to_string(),
    ];
    if let Some(ref cid) = attachment.content_id {
        headers.push(format!("Content-ID: <{cid}>"));
    }
    Part::Leaf {
        headers,
        body: &attachment.bytes,
    }
}

fn write_part(out: &mut String, part: &Part<'_>, boundaries: &mut usize) {
    match part {
        Part::Leaf { headers, body } => {
            for header in headers {
                out.push_str(header);
                out.push_str("\r\n");
            }
            out.push_str("\r\n");
            out.push_str(&wrapped_base64(body));
            out.push_str("\r\n");
        }
        Part::Multipart { subtype, parts } => {
            *boundaries += 1;
            let boundary = format!("=_mailpdf_{boundaries}");
            out.push_str(&format!(
                "Content-Type: multipart/{subtype}; boundary=\"{boundary}\"\r\n\r\n"
            ));
            for child in parts {
                out.push_str(&format!("--{boundary}\r\n"));
                write_part(out, child, boundaries);
            }
            out.push_str(&format!("--{boundary}--\r\n"));
        }
    }
}

fn wrapped_base64(bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    encoded
        .as_bytes()
        .chunks(LINE_LEN)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\r\n")
}

fn needs_encoding(value: &str) -> bool {
    value.contains("=?") || value.chars().any(|c| !c.is_ascii() || c.is_ascii_control())
}

/// RFC 2047 `B` encoding, split on character boundaries and folded.
fn encode_words(value: &str) -> String {
    if !needs_encoding(value) {
        return value.to_string();
    }
    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in value.chars() {
        if chunk.len() + c.len_utf8() > WORD_BYTES {
            words.push(std::mem::take(&mut chunk));
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(chunk);
    }
    words
        .iter()
        .map(|w| {
            let encoded = base64::engine::general_purpose::STANDARD.encode(w.as_bytes());
            format!("=?UTF-8?B?{encoded}?=")
        })
        .collect::<Vec<_>>()
        .join("\r\n ")
}

/// Re-emit a display-form address list with quoted or encoded names.
fn address_header(value: &str) -> String {
    EmailAddress::parse_list(value)
        .iter()
        .map(|addr| {
            let name = if addr.display_name.is_empty() {
                String::new()
            } else if needs_encoding(&addr.display_name) {
                encode_words(&addr.display_name)
            } else {
                let escaped = addr.display_name.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{escaped}\"")
            };
            match (name.is_empty(), addr.address.is_empty()) {
                (true, _) => addr.address.clone(),
                (false, true) => name,
                (false, false) => format!("{name} <{}>", addr.address),
            }
        })
        .collect::<Vec<_>>()
        .join(",\r\n ")
}

/// `name`/`filename` parameters; RFC 2231 form when the value is not plain
/// ASCII.
fn filename_params(filename: &str) -> (String, String) {
    let plain = filename
        .chars()
        .all(|c| (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ');
    if plain {
        return (format!("name=\"{filename}\""), format!("filename=\"{filename}\""));
    }
    let encoded: String = filename
        .bytes()
        .map(|b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_') {
                char::from(b).to_string()
            } else {
                format!("%{b:02X}")
            }
        })
        .collect();
    (
        format!("name*=utf-8''{encoded}"),
        format!("filename*=utf-8''{encoded}"),
    )
}
