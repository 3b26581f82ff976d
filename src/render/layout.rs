//! Page layout: a top-down cursor over fixed-size pages.
//!
//! Text, rules and images all go through the same pagination check: when
//! the next item would cross the bottom margin, a new page is started and
//! the cursor returns to the top margin.

use crate::config::RenderConfig;

/// Measures rendered text width in points.
pub trait TextMeasure {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

/// Every character has the same advance, as a fraction of the font size.
#[derive(Debug, Clone, Copy)]
pub struct FixedAdvance(pub f32);

impl TextMeasure for FixedAdvance {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars().count() as f32 * self.0 * size
    }
}

/// Page size and margins in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub width: f32,
    pub height: f32,
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
}

impl PageGeometry {
    pub fn from_config(config: &RenderConfig) -> Self {
        Self {
            width: config.page_width,
            height: config.page_height,
            margin_top: config.margin_top,
            margin_right: config.margin_right,
            margin_bottom: config.margin_bottom,
            margin_left: config.margin_left,
        }
    }

    pub fn content_width(&self) -> f32 {
        (self.width - self.margin_left - self.margin_right).max(1.0)
    }

    pub fn content_height(&self) -> f32 {
        (self.height - self.margin_top - self.margin_bottom).max(1.0)
    }

    /// Y of the top margin in PDF coordinates (origin bottom-left).
    pub fn top(&self) -> f32 {
        self.height - self.margin_top
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub line_height: f32,
    pub bold: bool,
    /// 0.0 is black.
    pub gray: f32,
}

/// A positioned drawing instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text {
        x: f32,
        baseline: f32,
        style: TextStyle,
        text: String,
    },
    Rule {
        x1: f32,
        x2: f32,
        y: f32,
        thickness: f32,
    },
    /// `image` indexes the image list handed to the PDF writer.
    Image {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        image: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub elements: Vec<Element>,
}

/// Scale `(width, height)` down to fit both limits, keeping the aspect
/// ratio. Never scales up.
pub fn fit(width: f32, height: f32, max_width: f32, max_height: f32) -> (f32, f32) {
    if width <= 0.0 || height <= 0.0 {
        return (0.0, 0.0);
    }
    let scale = (max_width / width).min(max_height / height).min(1.0);
    (width * scale, height * scale)
}

pub struct Layout<'a, M: TextMeasure + ?Sized> {
    measure: &'a M,
    geometry: PageGeometry,
    pages: Vec<Page>,
    current: Page,
    cursor: f32,
}

impl<'a, M: TextMeasure + ?Sized> Layout<'a, M> {
    pub fn new(measure: &'a M, geometry: PageGeometry) -> Self {
        Self {
            measure,
            geometry,
            pages: Vec::new(),
            current: Page::default(),
            cursor: geometry.top(),
        }
    }

    pub fn geometry(&self) -> &PageGeometry {
        &self.geometry
    }

    /// Pages started so far, including the current one.
    pub fn page_count(&self) -> usize {
        self.pages.len() + 1
    }

    fn at_page_top(&self) -> bool {
        (self.cursor - self.geometry.top()).abs() < 0.01
    }

    fn new_page(&mut self) {
        let page = std::mem::take(&mut self.current);
        self.pages.push(page);
        self.cursor = self.geometry.top();
    }

    /// Start a new page unless `height` still fits above the bottom margin.
    /// An item taller than a whole page is placed at the top of a fresh one.
    fn reserve(&mut self, height: f32) {
        if self.cursor - height < self.geometry.margin_bottom - 0.01 && !self.at_page_top() {
            self.new_page();
        }
    }

    /// Vertical gap. A gap is dropped at the top of a page.
    pub fn space(&mut self, points: f32) {
        if !self.at_page_top() {
            self.cursor = (self.cursor - points).max(self.geometry.margin_bottom);
        }
    }

    /// Flow text: explicit `\n` breaks lines, empty lines become blank lines,
    /// everything else is greedily wrapped to the content width.
    pub fn text(&mut self, text: &str, style: TextStyle) {
        for paragraph in text.split('\n') {
            if paragraph.trim().is_empty() {
                self.reserve(style.line_height);
                if !self.at_page_top() {
                    self.cursor -= style.line_height;
                }
                continue;
            }
            for line in self.wrap(paragraph, style.size) {
                self.line(line, style);
            }
        }
    }

    /// Place one already-wrapped line.
    pub fn line(&mut self, text: String, style: TextStyle) {
        self.reserve(style.line_height);
        let baseline = self.cursor - (style.line_height + style.size) / 2.0 + style.size * 0.2;
        self.current.elements.push(Element::Text {
            x: self.geometry.margin_left,
            baseline,
            style,
            text,
        });
        self.cursor -= style.line_height;
    }

    /// Horizontal divider across the content width.
    pub fn rule(&mut self, thickness: f32, gap: f32) {
        self.reserve(thickness + 2.0 * gap);
        self.cursor -= gap;
        self.current.elements.push(Element::Rule {
            x1: self.geometry.margin_left,
            x2: self.geometry.width - self.geometry.margin_right,
            y: self.cursor,
            thickness,
        });
        self.cursor -= thickness + gap;
    }

    /// Place an image of natural size `width` x `height`, scaled down to the
    /// content width and `max_height`.
    pub fn image(&mut self, image: usize, width: f32, height: f32, max_height: f32) {
        let max_height = max_height.min(self.geometry.content_height());
        let (w, h) = fit(width, height, self.geometry.content_width(), max_height);
        if w <= 0.0 || h <= 0.0 {
            return;
        }
        self.reserve(h);
        self.current.elements.push(Element::Image {
            x: self.geometry.margin_left,
            y: self.cursor - h,
            width: w,
            height: h,
            image,
        });
        self.cursor -= h;
    }

    /// Greedy word wrap. A word wider than the whole line is split between
    /// characters.
    pub fn wrap(&self, text: &str, size: f32) -> Vec<String> {
        let max = self.geometry.content_width();
        let fits = |s: &str| self.measure.text_width(s, size) <= max + 0.001;

        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            if current.is_empty() {
                if fits(word) {
                    current.push_str(word);
                    continue;
                }
            } else {
                let candidate = format!("{current} {word}");
                if fits(&candidate) {
                    current = candidate;
                    continue;
                }
                lines.push(std::mem::take(&mut current));
                if fits(word) {
                    current.push_str(word);
                    continue;
                }
            }

            for c in word.chars() {
                current.push(c);
                if !fits(&current) && current.chars().count() > 1 {
                    current.pop();
                    lines.push(std::mem::take(&mut current));
                    current.push(c);
                }
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    /// Close the layout. There is always at least one page.
    pub fn finish(mut self) -> Vec<Page> {
        self.pages.push(self.current);
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 200pt tall page, 20pt margins: 160pt of content, ten 16pt lines.
    fn small_page() -> PageGeometry {
        PageGeometry {
            width: 200.0,
            height: 200.0,
            margin_top: 20.0,
            margin_right: 20.0,
            margin_bottom: 20.0,
            margin_left: 20.0,
        }
    }

    const BODY: TextStyle = TextStyle {
        size: 10.0,
        line_height: 16.0,
        bold: false,
        gray: 0.0,
    };

    fn text_lines(pages: &[Page]) -> Vec<Vec<String>> {
        pages
            .iter()
            .map(|p| {
                p.elements
                    .iter()
                    .filter_map(|e| match e {
                        Element::Text { text, .. } => Some(text.clone()),
                        _ => None,
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_pagination_is_exact() {
        // Content width 160pt, 10pt glyphs at 0.5em: 32 chars per line
        let measure = FixedAdvance(0.5);
        for (lines, pages) in [(1, 1), (10, 1), (11, 2), (20, 2), (25, 3), (30, 3), (31, 4)] {
            let mut layout = Layout::new(&measure, small_page());
            let text = vec!["line"; lines].join("\n");
            layout.text(&text, BODY);
            assert_eq!(layout.finish().len(), pages, "{lines} lines");
        }
    }

    #[test]
    fn test_wrapped_text_paginates_by_wrapped_lines() {
        let measure = FixedAdvance(0.5);
        let mut layout = Layout::new(&measure, small_page());
        // 25 words of 31 chars: each fills its own line
        let word = "x".repeat(31);
        let text = vec![word.as_str(); 25].join(" ");
        layout.text(&text, BODY);
        let pages = layout.finish();
        assert_eq!(pages.len(), 3);
        assert_eq!(text_lines(&pages).iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
    }

    #[test]
    fn test_greedy_wrap() {
        let measure = FixedAdvance(0.5);
        let layout = Layout::new(&measure, small_page());
        // 32 chars per line
        let lines = layout.wrap("aaaa bbbb cccc dddd eeee ffff gggg hhhh", 10.0);
        assert_eq!(lines, vec!["aaaa bbbb cccc dddd eeee ffff", "gggg hhhh"]);
    }

    #[test]
    fn test_overlong_word_is_hard_split() {
        let measure = FixedAdvance(0.5);
        let layout = Layout::new(&measure, small_page());
        let url = "h".repeat(70);
        let lines = layout.wrap(&format!("see {url} ok"), 10.0);
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "see");
        assert_eq!(lines[1].len(), 32);
        assert_eq!(lines[2].len(), 32);
        assert_eq!(lines[3], format!("{} ok", "h".repeat(6)));
    }

    #[test]
    fn test_glyph_wider_than_line_still_terminates() {
        let measure = FixedAdvance(50.0);
        let layout = Layout::new(&measure, small_page());
        assert_eq!(layout.wrap("abc", 10.0), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_blank_lines_and_empty_input() {
        let measure = FixedAdvance(0.5);
        let mut layout = Layout::new(&measure, small_page());
        layout.text("", BODY);
        let pages = layout.finish();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].elements.is_empty());
    }

    #[test]
    fn test_fit_scales_down_only() {
        assert_eq!(fit(100.0, 50.0, 400.0, 400.0), (100.0, 50.0));
        assert_eq!(fit(800.0, 400.0, 400.0, 400.0), (400.0, 200.0));
        let (w, h) = fit(100.0, 1000.0, 400.0, 360.0);
        assert!((w - 36.0).abs() < 0.001 && (h - 360.0).abs() < 0.001);
        assert_eq!(fit(0.0, 10.0, 100.0, 100.0), (0.0, 0.0));
    }

    #[test]
    fn test_image_that_does_not_fit_moves_to_next_page() {
        let measure = FixedAdvance(0.5);
        let mut layout = Layout::new(&measure, small_page());
        for _ in 0..5 {
            layout.line("x".to_string(), BODY);
        }
        // 80pt used, 80pt left; a 100pt image needs a new page
        layout.image(0, 100.0, 100.0, 1000.0);
        let pages = layout.finish();
        assert_eq!(pages.len(), 2);
        assert!(matches!(
            pages[1].elements[0],
            Element::Image { y, height, .. } if (y + height - 180.0).abs() < 0.01
        ));
    }

    #[test]
    fn test_image_capped_by_max_height_and_width() {
        let measure = FixedAdvance(0.5);
        let mut layout = Layout::new(&measure, small_page());
        layout.image(3, 1600.0, 800.0, 360.0);
        let pages = layout.finish();
        let Element::Image { x, y, width, height, image } = pages[0].elements[0] else {
            panic!("expected an image");
        };
        assert_eq!((x, image), (20.0, 3));
        assert!((width - 160.0).abs() < 0.01 && (height - 80.0).abs() < 0.01);
        assert!((y - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_rule_spans_content_width() {
        let measure = FixedAdvance(0.5);
        let mut layout = Layout::new(&measure, small_page());
        layout.rule(1.0, 4.0);
        let pages = layout.finish();
        assert!(matches!(
            pages[0].elements[0],
            Element::Rule { x1, x2, .. } if x1 == 20.0 && x2 == 180.0
        ));
    }
}
