//! Header value decoding: RFC 2047 encoded-words, charsets, and dates.
//!
//! `mail-parser` already resolves all of this for MIME input. These helpers
//! exist for values that arrive from elsewhere (the `.msg` decoders and the
//! external collaborator), which frequently pass encoded-words and
//! free-form date strings through untouched.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::warn;

/// Standard alphabet, padding optional. Real-world producers get this wrong
/// in both directions.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64, ignoring embedded whitespace and missing padding.
pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    LENIENT_BASE64.decode(compact.as_bytes()).ok()
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_string();
    }

    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two adjacent encoded-words is not part of the text
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        match decode_one_word(after_start) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after_start[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Decode `charset?encoding?text?=` (the part after `=?`).
///
/// Returns the text and the number of bytes consumed.
fn decode_one_word(s: &str) -> Option<(String, usize)> {
    let mut parts = s.splitn(3, '?');
    let raw_charset = parts.next()?;
    let encoding = parts.next()?;
    let tail = parts.next()?;
    let end = tail.find("?=")?;
    let encoded_text = &tail[..end];

    // RFC 2231 language suffix: charset*lang
    let charset = raw_charset.split('*').next().unwrap_or(raw_charset);

    let bytes = match encoding {
        "B" | "b" => decode_base64(encoded_text)?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    let consumed = raw_charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((decode_charset(charset, &bytes), consumed))
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset (any WHATWG label `encoding_rs` knows).
pub fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let label = charset.trim();
    if label.eq_ignore_ascii_case("utf-8") || label.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(label.as_bytes()) {
        Some(encoding) => encoding.decode(bytes).0.into_owned(),
        None => {
            warn!(charset = label, "Unknown charset, falling back to UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Normalize a free-form date to RFC 3339, keeping the original offset.
///
/// Returns `None` (and logs) when nothing recognisable is found.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_date(raw).map(|dt| dt.to_rfc3339())
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
/// Dates without a zone are taken as UTC.
pub fn parse_date(date_str: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt);
    }

    let no_dow = strip_day_of_week(trimmed);
    // IMAP-style: "16-JUL-2025 03:01:03" → "16 Jul 2025 03:01:03"
    let no_dow_normalized = normalize_imap_date(&no_dow);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    for candidate in [no_dow.clone(), no_dow_normalized.clone()]
        .into_iter()
        .chain([replace_named_tz(&no_dow), replace_named_tz(&no_dow_normalized)])
    {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&candidate, fmt) {
                return Some(dt);
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(&candidate, fmt) {
                return Some(ndt.and_utc().fixed_offset());
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Last resort: wrap the value in a one-header message and let `mail-parser` try.
fn mail_parser_date(input: &str) -> Option<DateTime<FixedOffset>> {
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = mail_parser::MessageParser::default().parse(fake_msg.as_bytes())?;
    let date = parsed.date()?;
    DateTime::parse_from_rfc3339(&date.to_rfc3339()).ok()
}

/// Normalize IMAP-style dates: `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    if !s.contains('-') {
        return s.to_string();
    }

    const MONTHS: [&str; 12] = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    let lower = s.to_ascii_lowercase();
    for month in MONTHS {
        let pattern = format!("-{}-", month.to_ascii_lowercase());
        if let Some(pos) = lower.find(&pattern) {
            let mut result = String::with_capacity(s.len());
            result.push_str(&s[..pos]);
            result.push(' ');
            result.push_str(month);
            result.push(' ');
            result.push_str(&s[pos + pattern.len()..]);
            return result;
        }
    }
    s.to_string()
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

/// Replace a trailing timezone abbreviation with its numeric offset.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 13] = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    // "... +0000 (UTC)" comments are common too
    let base = match s.rfind(" (") {
        Some(pos) if s.ends_with(')') => &s[..pos],
        _ => s,
    };
    for (name, offset) in ZONES {
        if let Some(head) = base.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    base.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_unpadded_base64_word() {
        assert_eq!(decode_encoded_words("=?utf-8?b?SG9sYQ?="), "Hola");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?R=E9sum=E9_du_projet?="), "Résumé du projet");
    }

    #[test]
    fn test_adjacent_words_join_without_space() {
        assert_eq!(
            decode_encoded_words("=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="),
            "Hola mundo"
        );
        assert_eq!(decode_encoded_words("Re: =?UTF-8?B?SG9sYQ==?= there"), "Re: Hola there");
    }

    #[test]
    fn test_malformed_word_kept_verbatim() {
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?= tail"), "=?UTF-8?X?abc?= tail");
        assert_eq!(decode_encoded_words("price =? 5"), "price =? 5");
    }

    #[test]
    fn test_decode_windows1252_and_cjk() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
        assert_eq!(decode_encoded_words("=?UTF-8?B?5bGx55Sw5aSq6YOO?="), "山田太郎");
    }

    #[test]
    fn test_decode_charset_unknown_label() {
        assert_eq!(decode_charset("x-made-up", b"plain"), "plain");
    }

    #[test]
    fn test_decode_base64_ignores_whitespace() {
        assert_eq!(decode_base64("aGVs\r\nbG8=").as_deref(), Some(&b"hello"[..]));
        assert!(decode_base64("!!not base64!!").is_none());
    }

    #[test]
    fn test_normalize_date_keeps_offset() {
        assert_eq!(
            normalize_date("Thu, 04 Jan 2024 10:00:00 +0100").as_deref(),
            Some("2024-01-04T10:00:00+01:00")
        );
    }

    #[test]
    fn test_parse_date_variants() {
        for raw in [
            "04 Jan 2024 10:00:00 +0000",
            "Thu, 04 Jan 2024 10:00:00 EST",
            "Thu, 4 Jan 2024 10:00:00 +0000 (UTC)",
            "2024-01-04T10:00:00Z",
            "2024-01-04T10:00:00",
            "2024-01-04 10:00:00",
            "04-JAN-2024 10:00:00",
        ] {
            let dt = parse_date(raw).unwrap_or_else(|| panic!("failed on {raw:?}"));
            assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04", "{raw}");
        }
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
        assert!(parse_date("sometime last week").is_none());
    }

    #[test]
    fn test_normalize_imap_date() {
        assert_eq!(normalize_imap_date("16-JUL-2025 03:01:03"), "16 Jul 2025 03:01:03");
        assert_eq!(normalize_imap_date("04 Jan 2024 10:00:00"), "04 Jan 2024 10:00:00");
    }
}
