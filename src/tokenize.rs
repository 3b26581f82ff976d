//! Body tokenizer: splits an HTML body into text runs and inline images.
//!
//! The HTML is cleaned once up front (comments and non-visible blocks
//! removed), then [`BodyTokens`] walks it a single time, cutting at every
//! `<img src="cid:...">`. Text between the cuts is stripped of markup,
//! entity-decoded and sanitized before it is handed out.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::model::normalize_content_id;
use crate::sanitize::{decode_entities, sanitize};

/// One unit of body content, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyToken {
    /// Plain text ready for layout.
    Text(String),
    /// Reference to an inline part by normalized content-id.
    Image { content_id: String },
}

/// Block boundary marker; collapses to at most one line break.
const BLOCK: char = '\u{E000}';
/// Paragraph marker; collapses to a blank line.
const PARAGRAPH: char = '\u{E001}';

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?(?:-->|\z)").expect("comment pattern"));

/// Blocks that never render. `<head>` and `<title>` need a closing tag so a
/// stray opener cannot swallow the whole body.
static HIDDEN_BLOCKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<head\b[^>]*>.*?</head\s*>",
        r"(?is)<title\b[^>]*>.*?</title\s*>",
        r"(?is)<style\b[^>]*>.*?(?:</style\s*>|\z)",
        r"(?is)<script\b[^>]*>.*?(?:</script\s*>|\z)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("hidden block pattern"))
    .collect()
});

static CID_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<img\b[^>]*?\ssrc\s*=\s*(?:"\s*cid:([^"]*)"|'\s*cid:([^']*)'|cid:([^\s>]+))[^>]*>"#,
    )
    .expect("cid image pattern")
});

static SOURCE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\n\x0C]+").expect("whitespace pattern"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(/?)([A-Za-z][A-Za-z0-9]*)\b[^>]*>|<[!?/][^>]*>").expect("tag pattern")
});

/// Tokenize an HTML body.
pub fn tokenize(html: &str) -> BodyTokens {
    let mut cleaned = COMMENT.replace_all(html, "").into_owned();
    for block in HIDDEN_BLOCKS.iter() {
        cleaned = block.replace_all(&cleaned, "").into_owned();
    }

    BodyTokens {
        html: cleaned,
        pos: 0,
        search_from: 0,
        pending_image: None,
        saw_image: false,
        emitted_text: false,
        finished: false,
    }
}

/// Visible text of an HTML body with images left out.
pub fn html_to_text(html: &str) -> String {
    tokenize(html)
        .filter_map(|t| match t {
            BodyToken::Text(s) => Some(s),
            BodyToken::Image { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-pass iterator over the tokens of one body.
pub struct BodyTokens {
    html: String,
    pos: usize,
    search_from: usize,
    pending_image: Option<String>,
    saw_image: bool,
    emitted_text: bool,
    finished: bool,
}

impl Iterator for BodyTokens {
    type Item = BodyToken;

    fn next(&mut self) -> Option<BodyToken> {
        loop {
            if let Some(content_id) = self.pending_image.take() {
                return Some(BodyToken::Image { content_id });
            }
            if self.finished {
                return None;
            }

            let found = CID_IMAGE.captures_at(&self.html, self.search_from).and_then(|caps| {
                let whole = caps.get(0)?;
                let raw_id = caps.get(1).or(caps.get(2)).or(caps.get(3))?.as_str();
                Some((whole.start(), whole.end(), normalize_content_id(&decode_entities(raw_id))))
            });

            let segment = match found {
                // An image tag with an empty cid is stripped with the text around it
                Some((_, end, None)) => {
                    self.search_from = end;
                    continue;
                }
                Some((start, end, Some(content_id))) => {
                    let segment = segment_to_text(&self.html[self.pos..start]);
                    self.pos = end;
                    self.search_from = end;
                    self.saw_image = true;
                    self.pending_image = Some(content_id);
                    segment
                }
                None => {
                    self.finished = true;
                    let segment = segment_to_text(&self.html[self.pos..]);
                    self.pos = self.html.len();
                    if segment.is_empty() && !self.saw_image && !self.emitted_text {
                        self.emitted_text = true;
                        return Some(BodyToken::Text(segment));
                    }
                    segment
                }
            };

            if !segment.is_empty() {
                self.emitted_text = true;
                return Some(BodyToken::Text(segment));
            }
        }
    }
}

/// Strip markup from one run of HTML and produce layout-ready text.
fn segment_to_text(html: &str) -> String {
    let collapsed = SOURCE_WHITESPACE.replace_all(html, " ");

    let stripped = TAG.replace_all(&collapsed, |caps: &Captures<'_>| {
        let Some(name) = caps.get(2) else {
            return String::new();
        };
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        match name.as_str().to_ascii_lowercase().as_str() {
            "br" => "\n".to_string(),
            "p" => PARAGRAPH.to_string(),
            "li" if !closing => format!("{BLOCK}\u{2022} "),
            "td" | "th" if !closing => " ".to_string(),
            "div" | "li" | "tr" | "table" | "ul" | "ol" | "h1" | "h2" | "h3" | "h4" | "h5"
            | "h6" | "blockquote" | "pre" | "section" | "article" | "header" | "footer"
            | "hr" | "dl" | "dt" | "dd" | "center" | "address" | "form" => BLOCK.to_string(),
            _ => String::new(),
        }
    });

    let decoded = decode_entities(&stripped);
    sanitize(resolve_breaks(&decoded).trim())
}

/// Collapse every run of spaces, line breaks and block markers into the
/// break it stands for.
fn resolve_breaks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if !matches!(c, ' ' | '\n' | BLOCK | PARAGRAPH) {
            out.push(c);
            continue;
        }

        let (mut newlines, mut block, mut paragraph) = (0usize, false, false);
        let mut tally = |c: char| match c {
            '\n' => newlines += 1,
            BLOCK => block = true,
            PARAGRAPH => paragraph = true,
            _ => {}
        };
        tally(c);
        while let Some(&next) = chars.peek() {
            if !matches!(next, ' ' | '\n' | BLOCK | PARAGRAPH) {
                break;
            }
            tally(next);
            chars.next();
        }

        let breaks = if paragraph {
            newlines.max(2)
        } else if block {
            newlines.max(1)
        } else {
            newlines
        };
        if breaks == 0 {
            out.push(' ');
        } else {
            out.extend(std::iter::repeat_n('\n', breaks));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(html: &str) -> Vec<BodyToken> {
        tokenize(html).collect()
    }

    fn text(s: &str) -> BodyToken {
        BodyToken::Text(s.to_string())
    }

    fn image(id: &str) -> BodyToken {
        BodyToken::Image {
            content_id: id.to_string(),
        }
    }

    #[test]
    fn test_no_images_yields_single_text_token() {
        assert_eq!(tokens("<p>Hello <b>world</b></p>"), vec![text("Hello world")]);
    }

    #[test]
    fn test_empty_html_yields_single_empty_text() {
        assert_eq!(tokens(""), vec![text("")]);
        assert_eq!(tokens("<html><head><title>x</title></head><body></body></html>"), vec![text("")]);
    }

    #[test]
    fn test_image_between_text_blocks() {
        let html = r#"<p>Before</p><img src="cid:img1" alt="x"><p>After</p>"#;
        assert_eq!(tokens(html), vec![text("Before"), image("img1"), text("After")]);
    }

    #[test]
    fn test_cid_case_and_bracket_variants() {
        let html = r#"<IMG SRC="CID:<Img1>"> <img width=10 src='cid: IMG2 '> <img src=cid:img3>"#;
        assert_eq!(tokens(html), vec![image("img1"), image("img2"), image("img3")]);
    }

    #[test]
    fn test_entity_encoded_cid() {
        let html = r#"<img src="cid:&lt;Img1&gt;">"#;
        assert_eq!(tokens(html), vec![image("img1")]);
    }

    #[test]
    fn test_remote_images_are_dropped() {
        let html = r#"a<img src="https://tracker.example/p.gif">b"#;
        assert_eq!(tokens(html), vec![text("ab")]);
    }

    #[test]
    fn test_data_src_is_not_a_source() {
        let html = r#"a<img data-src="cid:lazy">b<img data-src="cid:lazy" src="cid:real">c"#;
        assert_eq!(tokens(html), vec![text("ab"), image("real"), text("c")]);
    }

    #[test]
    fn test_unresolvable_cid_still_emitted() {
        let html = r#"<img src="cid:nowhere@example.com">"#;
        assert_eq!(tokens(html), vec![image("nowhere@example.com")]);
    }

    #[test]
    fn test_empty_cid_is_ignored() {
        assert_eq!(tokens(r#"x<img src="cid:">y"#), vec![text("xy")]);
    }

    #[test]
    fn test_hidden_blocks_and_comments_removed() {
        let html = "<head><style>p{color:red}</style></head>\
                    <!-- hidden --><script>alert(1)</script>Visible<style>.x{}";
        assert_eq!(tokens(html), vec![text("Visible")]);
    }

    #[test]
    fn test_unclosed_head_does_not_swallow_body() {
        assert_eq!(tokens("<head><body>Still here"), vec![text("Still here")]);
    }

    #[test]
    fn test_breaks_and_paragraphs() {
        let html = "Line one<br>Line two<br/><br />Para<p>Next</p><div>A</div><div>B</div>";
        assert_eq!(
            tokens(html),
            vec![text("Line one\nLine two\n\nPara\n\nNext\n\nA\nB")]
        );
    }

    #[test]
    fn test_source_whitespace_collapses() {
        assert_eq!(tokens("  Hello\n\n   world\t! "), vec![text("Hello world !")]);
    }

    #[test]
    fn test_list_items_get_bullets() {
        assert_eq!(
            tokens("<ul><li>One</li><li>Two</li></ul>"),
            vec![text("\u{2022} One\n\u{2022} Two")]
        );
    }

    #[test]
    fn test_entities_decoded_after_stripping() {
        assert_eq!(tokens("&lt;b&gt;not bold&lt;/b&gt; caf&eacute;&nbsp;ok"), vec![text("<b>not bold</b> café ok")]);
    }

    #[test]
    fn test_text_is_sanitized() {
        assert_eq!(tokens("zero\u{200B}width&#8203;"), vec![text("zerowidth")]);
    }

    #[test]
    fn test_html_to_text_skips_images() {
        let html = r#"<p>Top</p><img src="cid:a"><p>Bottom</p>"#;
        assert_eq!(html_to_text(html), "Top\nBottom");
    }
}
