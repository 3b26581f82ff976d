//! TrueType fonts: discovery, metrics and per-character glyph resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use ttf_parser::{name_id, Face, GlyphId};

use crate::config::RenderConfig;
use crate::error::{ConvertError, Result};
use crate::render::layout::TextMeasure;

/// Searched in order when no font is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/System/Library/Fonts/Helvetica.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// One loaded TrueType font. Metrics are extracted once at load time so
/// the font owns no borrowed parser state.
#[derive(Debug)]
pub struct Font {
    /// PostScript name, restricted to characters valid in a PDF name.
    pub name: String,
    pub path: PathBuf,
    pub data: Vec<u8>,
    pub units_per_em: u16,
    pub ascent: i16,
    pub descent: i16,
    pub cap_height: i16,
    pub italic_angle: f32,
    pub bbox: [i16; 4],
    pub is_monospaced: bool,
    cmap: HashMap<u32, u16>,
    advances: Vec<u16>,
}

impl Font {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| ConvertError::io(path, e))?;
        Self::from_bytes(data, path)
    }

    pub fn from_bytes(data: Vec<u8>, path: &Path) -> Result<Self> {
        let unusable = |reason: String| {
            ConvertError::render(format!("font {}: {reason}", path.display()))
        };
        let face = Face::parse(&data, 0).map_err(|e| unusable(e.to_string()))?;
        if face.tables().glyf.is_none() {
            return Err(unusable("no TrueType outlines".to_string()));
        }

        let mut cmap = HashMap::new();
        if let Some(table) = face.tables().cmap {
            for subtable in table.subtables.into_iter().filter(|s| s.is_unicode()) {
                subtable.codepoints(|cp| {
                    if let Some(gid) = subtable.glyph_index(cp) {
                        cmap.entry(cp).or_insert(gid.0);
                    }
                });
            }
        }
        if cmap.is_empty() {
            return Err(unusable("no Unicode character map".to_string()));
        }

        let advances = (0..face.number_of_glyphs())
            .map(|gid| face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0))
            .collect();

        let name = face
            .names()
            .into_iter()
            .filter(|n| n.name_id == name_id::POST_SCRIPT_NAME)
            .find_map(|n| n.to_string())
            .map(|n| pdf_name(&n))
            .filter(|n| !n.is_empty())
            .or_else(|| {
                path.file_stem()
                    .map(|s| pdf_name(&s.to_string_lossy()))
            })
            .unwrap_or_else(|| "Embedded".to_string());

        let bbox = face.global_bounding_box();
        Ok(Self {
            name,
            path: path.to_path_buf(),
            units_per_em: face.units_per_em().max(1),
            ascent: face.ascender(),
            descent: face.descender(),
            cap_height: face.capital_height().unwrap_or_else(|| face.ascender()),
            italic_angle: face.italic_angle().unwrap_or(0.0),
            bbox: [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max],
            is_monospaced: face.is_monospaced(),
            cmap,
            advances,
            data,
        })
    }

    pub fn glyph(&self, c: char) -> Option<u16> {
        self.cmap.get(&(c as u32)).copied().filter(|&gid| gid != 0)
    }

    /// Advance of a glyph in font units.
    pub fn advance(&self, gid: u16) -> u16 {
        self.advances.get(gid as usize).copied().unwrap_or(0)
    }

    /// Advance of a glyph in 1/1000 text space units, as PDF width arrays use.
    pub fn pdf_width(&self, gid: u16) -> i64 {
        (f32::from(self.advance(gid)) * 1000.0 / f32::from(self.units_per_em)).round() as i64
    }

    /// Scale a font-unit metric to 1/1000 text space units.
    pub fn scaled(&self, value: i16) -> i64 {
        (f32::from(value) * 1000.0 / f32::from(self.units_per_em)).round() as i64
    }
}

/// Primary font plus fallbacks consulted per character.
#[derive(Debug)]
pub struct FontSet {
    fonts: Vec<Font>,
}

/// Where a character is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphRef {
    pub font: usize,
    pub gid: u16,
}

impl FontSet {
    pub fn new(primary: Font, fallbacks: Vec<Font>) -> Self {
        let mut fonts = vec![primary];
        fonts.extend(fallbacks);
        Self { fonts }
    }

    /// Load the configured font, or the first usable system font, plus
    /// fallbacks. Fails when no TrueType font can be found at all.
    pub fn discover(config: &RenderConfig) -> Result<Self> {
        let mut primary = None;
        if let Some(ref path) = config.font_path {
            primary = Some(Font::load(path)?);
        }

        let mut fallbacks = Vec::new();
        for path in &config.fallback_fonts {
            match Font::load(path) {
                Ok(font) => fallbacks.push(font),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping fallback font"),
            }
        }

        for candidate in SYSTEM_FONT_CANDIDATES.iter().map(Path::new) {
            let already_loaded = primary.iter().chain(fallbacks.iter()).any(|f: &Font| f.path == candidate);
            if already_loaded || !candidate.exists() {
                continue;
            }
            match Font::load(candidate) {
                Ok(font) if primary.is_none() => primary = Some(font),
                Ok(font) => fallbacks.push(font),
                Err(e) => debug!(path = %candidate.display(), error = %e, "System font not usable"),
            }
        }

        let primary = primary.ok_or_else(|| {
            ConvertError::render(
                "no usable TrueType font found; set render.font_path in the config",
            )
        })?;
        debug!(
            primary = %primary.name,
            fallbacks = fallbacks.len(),
            "Fonts loaded"
        );
        Ok(Self::new(primary, fallbacks))
    }

    pub fn fonts(&self) -> &[Font] {
        &self.fonts
    }

    pub fn primary(&self) -> &Font {
        &self.fonts[0]
    }

    /// First font that has a glyph for `c`; `.notdef` of the primary font
    /// otherwise.
    pub fn resolve(&self, c: char) -> GlyphRef {
        self.fonts
            .iter()
            .enumerate()
            .find_map(|(font, f)| f.glyph(c).map(|gid| GlyphRef { font, gid }))
            .unwrap_or(GlyphRef { font: 0, gid: 0 })
    }

    pub fn has_glyph(&self, c: char) -> bool {
        self.fonts.iter().any(|f| f.glyph(c).is_some())
    }
}

impl TextMeasure for FontSet {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        text.chars()
            .map(|c| self.resolve(c))
            .filter(|glyph| glyph.gid != 0)
            .map(|glyph| {
                let font = &self.fonts[glyph.font];
                f32::from(font.advance(glyph.gid)) / f32::from(font.units_per_em)
            })
            .sum::<f32>()
            * size
    }
}

fn pdf_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        .collect()
}
