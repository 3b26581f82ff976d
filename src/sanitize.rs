//! Content sanitizer: makes arbitrary text safe to lay out.
//!
//! Every function here is total: whatever goes in, some string comes out.

/// Characters that render as nothing but still take up a glyph slot.
fn is_invisible(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}')
}

/// Normalize text for layout.
///
/// - removes zero-width space/non-joiner/joiner, word joiner and BOM
/// - turns non-breaking spaces and tabs into plain spaces
/// - maps `\r\n`, lone `\r`, U+2028, U+2029 and U+0085 to `\n`
/// - drops every other C0/C1 control character
/// - trims trailing spaces on each line
/// - collapses runs of three or more blank lines to two
pub fn sanitize(input: &str) -> String {
    let mut flat = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                flat.push('\n');
            }
            '\n' | '\u{2028}' | '\u{2029}' | '\u{0085}' => flat.push('\n'),
            '\t' | '\u{00A0}' | '\u{202F}' => flat.push(' '),
            c if is_invisible(c) => {}
            c if c.is_control() => {}
            c => flat.push(c),
        }
    }

    let mut out = String::with_capacity(flat.len());
    let mut blank_run = 0usize;
    for (i, line) in flat.split('\n').enumerate() {
        let line = line.trim_end_matches(' ');
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 2 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

/// Decode bytes of unknown quality, replacing invalid UTF-8, then sanitize.
pub fn sanitize_bytes(input: &[u8]) -> String {
    sanitize(&String::from_utf8_lossy(input))
}

/// Sanitize a header value and fold it onto a single line.
pub fn sanitize_header(input: &str) -> String {
    sanitize(input)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decode HTML character references.
///
/// Handles decimal and hex numeric references plus the named entities that
/// show up in real mail. Unknown or malformed references are left as-is.
pub fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        // Entity names are short; refuse to scan far for the semicolon.
        let semi = tail
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .map(|(i, _)| i);

        let decoded = semi.and_then(|end| decode_reference(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_reference(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = if let Some(hex) = num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            num.parse::<u32>().ok()?
        };
        // NUL and surrogates are not valid characters
        return char::from_u32(code).filter(|&c| c != '\0').or(Some('\u{FFFD}'));
    }

    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{00A0}',
        "shy" => '\u{00AD}',
        "copy" => '©',
        "reg" => '®',
        "trade" => '™',
        "hellip" => '…',
        "mdash" => '—',
        "ndash" => '–',
        "lsquo" => '‘',
        "rsquo" => '’',
        "ldquo" => '“',
        "rdquo" => '”',
        "sbquo" => '‚',
        "bdquo" => '„',
        "laquo" => '«',
        "raquo" => '»',
        "bull" => '•',
        "middot" => '·',
        "deg" => '°',
        "euro" => '€',
        "pound" => '£',
        "yen" => '¥',
        "cent" => '¢',
        "sect" => '§',
        "para" => '¶',
        "times" => '×',
        "divide" => '÷',
        "plusmn" => '±',
        "frac12" => '½',
        "iexcl" => '¡',
        "iquest" => '¿',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "uacute" => 'ú',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Iacute" => 'Í',
        "Oacute" => 'Ó',
        "Uacute" => 'Ú',
        "agrave" => 'à',
        "egrave" => 'è',
        "ograve" => 'ò',
        "auml" => 'ä',
        "euml" => 'ë',
        "ouml" => 'ö',
        "uuml" => 'ü',
        "Auml" => 'Ä',
        "Ouml" => 'Ö',
        "Uuml" => 'Ü',
        "szlig" => 'ß',
        "ntilde" => 'ñ',
        "Ntilde" => 'Ñ',
        "ccedil" => 'ç',
        "Ccedil" => 'Ç',
        "acirc" => 'â',
        "ecirc" => 'ê',
        "ocirc" => 'ô',
        "zwsp" => '\u{200B}',
        "zwnj" => '\u{200C}',
        "zwj" => '\u{200D}',
        _ => return None,
    };
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_zero_width_and_bom() {
        assert_eq!(sanitize("\u{FEFF}he\u{200B}l\u{200C}l\u{200D}o\u{2060}"), "hello");
    }

    #[test]
    fn test_nbsp_and_tab_become_space() {
        assert_eq!(sanitize("a\u{00A0}b\tc"), "a b c");
    }

    #[test]
    fn test_line_endings_normalized() {
        assert_eq!(sanitize("a\r\nb\rc\u{2028}d\u{2029}e\u{0085}f"), "a\nb\nc\nd\ne\nf");
    }

    #[test]
    fn test_collapses_blank_runs_to_two() {
        assert_eq!(sanitize("a\n\n\n\n\n\nb"), "a\n\n\nb");
        // Exactly two blank lines are kept
        assert_eq!(sanitize("a\n\n\nb"), "a\n\n\nb");
        assert_eq!(sanitize("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_whitespace_only_lines_count_as_blank() {
        assert_eq!(sanitize("a\n  \n \t\n   \n\nb"), "a\n\n\nb");
    }

    #[test]
    fn test_control_characters_dropped() {
        assert_eq!(sanitize("a\u{0000}b\u{0007}c\u{009B}d\u{007F}"), "abcd");
    }

    #[test]
    fn test_total_on_hostile_input() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("\u{200B}\u{200B}\u{FEFF}"), "");
        assert_eq!(sanitize("\u{0001}\u{0002}\u{001F}"), "");
        let hostile: String = (0u32..0x3000).filter_map(char::from_u32).collect();
        let _ = sanitize(&hostile);
    }

    #[test]
    fn test_sanitize_bytes_invalid_utf8() {
        let out = sanitize_bytes(&[0x66, 0x6F, 0xFF, 0xFE, 0x6F, 0xC3]);
        assert!(out.starts_with("fo"));
        assert!(out.contains('\u{FFFD}'));
        assert!(sanitize_bytes(&[0xC0, 0x80, 0xED, 0xA0, 0x80])
            .chars()
            .all(|c| c == '\u{FFFD}'));
    }

    #[test]
    fn test_sanitize_header_folds() {
        assert_eq!(sanitize_header("  Quarterly\r\n  report\u{200B}  "), "Quarterly report");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("Tom &amp; Jerry &lt;3&gt;"), "Tom & Jerry <3>");
        assert_eq!(decode_entities("&#233;t&#xE9; &rsquo;"), "été ’");
        assert_eq!(decode_entities("caf&eacute;&nbsp;ok"), "café\u{00A0}ok");
    }

    #[test]
    fn test_decode_entities_leaves_unknown() {
        assert_eq!(decode_entities("AT&T &bogus; & ;"), "AT&T &bogus; & ;");
        assert_eq!(decode_entities("&#0;"), "\u{FFFD}");
        assert_eq!(decode_entities("&#xD800;"), "\u{FFFD}");
    }
}
