//! Outlook RTF bodies.
//!
//! `.msg` files often carry their only formatted body as compressed RTF
//! (MS-OXRTFCP). When Outlook received the message as HTML, that RTF merely
//! wraps the original markup (MS-OXRTFEX `\fromhtml1`), so the HTML can be
//! recovered exactly. Otherwise the RTF is reduced to plain text.

use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::Encoding;

use crate::error::{ConvertError, Result};

/// `"LZFu"` little-endian: compressed payload.
const COMPRESSED: u32 = 0x7546_5A4C;
/// `"MELA"` little-endian: payload stored as-is.
const UNCOMPRESSED: u32 = 0x414C_454D;

const HEADER_LEN: usize = 16;
const DICT_LEN: usize = 4096;
/// Most output one input byte can yield: a control byte followed by eight
/// two-byte references of up to 17 bytes each.
const MAX_EXPANSION: usize = 8;

/// Dictionary preload defined by MS-OXRTFCP.
const PREBUF: &[u8] = b"{\\rtf1\\ansi\\mac\\deff0\\deftab720{\\fonttbl;}{\\f0\\fnil \\froman \\fswiss \\fmodern \\fscript \\fdecor MS Sans SerifSymbolArialTimes New RomanCourier{\\colortbl\\red0\\green0\\blue0\r\n\\par \\pard\\plain\\f0\\fs20\\b\\i\\u\\tab\\tx";

/// Decompress a `PR_RTF_COMPRESSED` stream.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(ConvertError::parse("compressed RTF header truncated"));
    }

    let comp_size = LittleEndian::read_u32(&data[0..4]) as usize;
    let raw_size = LittleEndian::read_u32(&data[4..8]) as usize;
    let comp_type = LittleEndian::read_u32(&data[8..12]);
    // comp_size counts everything after its own field
    let end = comp_size.saturating_add(4).min(data.len());

    match comp_type {
        UNCOMPRESSED => {
            let body = &data[HEADER_LEN..];
            Ok(body[..raw_size.min(body.len())].to_vec())
        }
        COMPRESSED => Ok(decompress_lzfu(&data[HEADER_LEN..end.max(HEADER_LEN)], raw_size)),
        other => Err(ConvertError::parse(format!(
            "unknown compressed RTF type 0x{other:08x}"
        ))),
    }
}

fn decompress_lzfu(input: &[u8], raw_size: usize) -> Vec<u8> {
    let mut dict = [0u8; DICT_LEN];
    dict[..PREBUF.len()].copy_from_slice(PREBUF);
    let mut write = PREBUF.len();

    // raw_size comes from the file and is only trusted as an upper bound
    let mut out = Vec::with_capacity(raw_size.min(input.len().saturating_mul(MAX_EXPANSION)));
    let mut pos = 0;

    'outer: while pos < input.len() {
        let control = input[pos];
        pos += 1;

        for bit in 0..8 {
            if pos >= input.len() {
                break 'outer;
            }
            if control & (1 << bit) == 0 {
                let byte = input[pos];
                pos += 1;
                out.push(byte);
                dict[write] = byte;
                write = (write + 1) % DICT_LEN;
                continue;
            }

            if pos + 1 >= input.len() {
                break 'outer;
            }
            let reference = u16::from_be_bytes([input[pos], input[pos + 1]]) as usize;
            pos += 2;
            let offset = reference >> 4;
            let length = (reference & 0x0F) + 2;
            // A reference to the write position marks the end of the stream
            if offset == write {
                break 'outer;
            }
            for i in 0..length {
                let byte = dict[(offset + i) % DICT_LEN];
                out.push(byte);
                dict[write] = byte;
                write = (write + 1) % DICT_LEN;
            }
        }
    }

    out.truncate(raw_size);
    out
}

/// Body recovered from an RTF document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtfBody {
    Html(String),
    Text(String),
}

/// Whether the document wraps an original HTML body.
pub fn is_html_encapsulated(rtf: &[u8]) -> bool {
    let head = &rtf[..rtf.len().min(1024)];
    head.windows(10).any(|w| w == b"\\fromhtml1")
}

/// Recover the HTML when the RTF encapsulates it, plain text otherwise.
pub fn extract_body(rtf: &[u8]) -> RtfBody {
    if is_html_encapsulated(rtf) {
        RtfBody::Html(walk(rtf, true))
    } else {
        RtfBody::Text(walk(rtf, false))
    }
}

/// Plain text of an RTF document.
pub fn to_text(rtf: &[u8]) -> String {
    walk(rtf, false)
}

/// Destinations whose content is never part of the body.
const SKIPPED_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "object",
    "header",
    "headerl",
    "headerr",
    "footer",
    "footerl",
    "footerr",
    "listtable",
    "listoverridetable",
    "revtbl",
    "rsidtbl",
    "generator",
    "xmlnstbl",
    "themedata",
    "colorschememapping",
    "latentstyles",
    "datastore",
    "fldinst",
];

#[derive(Debug, Clone, Copy)]
struct GroupState {
    skip: bool,
    suppressed: bool,
    html_tag: bool,
    unicode_skip: usize,
}

impl Default for GroupState {
    fn default() -> Self {
        Self {
            skip: false,
            suppressed: false,
            html_tag: false,
            unicode_skip: 1,
        }
    }
}

struct Walker<'a> {
    html: bool,
    out: String,
    pending: Vec<u8>,
    encoding: &'static Encoding,
    state: GroupState,
    stack: Vec<GroupState>,
    /// Fallback characters still to drop after a `\uN`.
    skip_chars: usize,
    group_start: bool,
    starred: bool,
    input: &'a [u8],
}

impl Walker<'_> {
    fn emitting(&self) -> bool {
        if self.state.skip {
            return false;
        }
        !(self.html && self.state.suppressed && !self.state.html_tag)
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            let (decoded, _) = self.encoding.decode_without_bom_handling(&self.pending);
            self.out.push_str(&decoded);
            self.pending.clear();
        }
    }

    fn push_byte(&mut self, byte: u8) {
        self.group_start = false;
        if self.skip_chars > 0 {
            self.skip_chars -= 1;
        } else if self.emitting() {
            self.pending.push(byte);
        }
    }

    fn push_char(&mut self, c: char) {
        if self.emitting() {
            self.flush();
            self.out.push(c);
        }
    }

    fn control_word(&mut self, word: &str, param: Option<i32>, pos: &mut usize) {
        if self.group_start {
            if self.starred {
                if self.html && word == "htmltag" {
                    self.state.html_tag = true;
                } else {
                    self.state.skip = true;
                }
            } else if SKIPPED_DESTINATIONS.contains(&word) {
                self.state.skip = true;
            }
        }
        self.group_start = false;
        self.starred = false;

        match word {
            "ansicpg" => {
                if let Some(encoding) = param.and_then(codepage_encoding) {
                    self.flush();
                    self.encoding = encoding;
                }
            }
            "htmlrtf" => {
                self.flush();
                self.state.suppressed = param != Some(0);
            }
            "par" | "line" | "sect" | "row" => self.push_char('\n'),
            "tab" | "cell" => self.push_char('\t'),
            "uc" => self.state.unicode_skip = param.unwrap_or(1).max(0) as usize,
            "u" => {
                if let Some(n) = param {
                    // Values above 32767 are written as negative numbers
                    let code = (if n < 0 { n + 65536 } else { n }) as u32;
                    self.push_char(char::from_u32(code).unwrap_or('\u{FFFD}'));
                    self.skip_chars = self.state.unicode_skip;
                }
            }
            "emdash" => self.push_char('\u{2014}'),
            "endash" => self.push_char('\u{2013}'),
            "lquote" => self.push_char('\u{2018}'),
            "rquote" => self.push_char('\u{2019}'),
            "ldblquote" => self.push_char('\u{201C}'),
            "rdblquote" => self.push_char('\u{201D}'),
            "bullet" => self.push_char('\u{2022}'),
            "emspace" | "enspace" | "qmspace" => self.push_char(' '),
            "bin" => {
                let skip = param.unwrap_or(0).max(0) as usize;
                *pos = (*pos + skip).min(self.input.len());
            }
            _ => {}
        }
    }
}

fn walk(rtf: &[u8], html: bool) -> String {
    let mut w = Walker {
        html,
        out: String::with_capacity(rtf.len() / 2),
        pending: Vec::new(),
        encoding: encoding_rs::WINDOWS_1252,
        state: GroupState::default(),
        stack: Vec::new(),
        skip_chars: 0,
        group_start: false,
        starred: false,
        input: rtf,
    };

    let mut i = 0;
    while i < rtf.len() {
        match rtf[i] {
            b'{' => {
                w.flush();
                w.stack.push(w.state);
                w.group_start = true;
                w.starred = false;
                i += 1;
            }
            b'}' => {
                w.flush();
                w.state = w.stack.pop().unwrap_or_default();
                w.group_start = false;
                i += 1;
            }
            b'\r' | b'\n' => i += 1,
            b'\\' => {
                i += 1;
                let Some(&c) = rtf.get(i) else { break };
                if c.is_ascii_alphabetic() {
                    let start = i;
                    while i < rtf.len() && rtf[i].is_ascii_alphabetic() && i - start < 32 {
                        i += 1;
                    }
                    let word = String::from_utf8_lossy(&rtf[start..i]).into_owned();

                    let param_start = i;
                    if rtf.get(i) == Some(&b'-') {
                        i += 1;
                    }
                    while i < rtf.len() && rtf[i].is_ascii_digit() && i - param_start < 11 {
                        i += 1;
                    }
                    let param = std::str::from_utf8(&rtf[param_start..i])
                        .ok()
                        .and_then(|s| s.parse::<i32>().ok());
                    if param.is_none() {
                        i = param_start;
                    }
                    if rtf.get(i) == Some(&b' ') {
                        i += 1;
                    }
                    w.control_word(&word, param, &mut i);
                } else {
                    i += 1;
                    match c {
                        b'\'' => {
                            let hex = rtf.get(i..i + 2).and_then(|h| std::str::from_utf8(h).ok());
                            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                                w.push_byte(byte);
                                i += 2;
                            }
                        }
                        b'*' => w.starred = true,
                        b'\\' | b'{' | b'}' => w.push_byte(c),
                        b'~' => w.push_char('\u{00A0}'),
                        b'_' => w.push_char('-'),
                        b'\r' | b'\n' => w.push_char('\n'),
                        _ => {}
                    }
                }
            }
            byte => {
                w.push_byte(byte);
                i += 1;
            }
        }
    }

    w.flush();
    w.out
}

/// Map a Windows code page number to an encoding.
pub(crate) fn codepage_encoding(codepage: i32) -> Option<&'static Encoding> {
    let label = match codepage {
        65001 => "utf-8",
        932 => "shift_jis",
        936 => "gbk",
        949 => "euc-kr",
        950 => "big5",
        874 => "windows-874",
        20866 => "koi8-r",
        21866 => "koi8-u",
        1250..=1258 => return Encoding::for_label(format!("windows-{codepage}").as_bytes()),
        28591..=28606 => {
            return Encoding::for_label(format!("iso-8859-{}", codepage - 28590).as_bytes())
        }
        _ => return None,
    };
    Encoding::for_label(label.as_bytes())
}
