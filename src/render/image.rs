//! Raster images prepared for embedding as PDF image XObjects.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{GenericImageView, ImageFormat};

use crate::error::{ConvertError, Result};

/// Screen resolution assumed for pixel dimensions.
const PIXELS_PER_INCH: f32 = 96.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    Gray,
    Rgb,
}

impl ColorSpace {
    pub fn pdf_name(self) -> &'static str {
        match self {
            Self::Gray => "DeviceGray",
            Self::Rgb => "DeviceRGB",
        }
    }
}

/// Stream payload and its PDF filter.
#[derive(Debug, Clone)]
pub enum ImageData {
    /// Original JPEG bytes, decoded by the viewer (`DCTDecode`).
    Jpeg(Vec<u8>),
    /// Zlib-compressed 8-bit samples (`FlateDecode`).
    Flate(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub data: ImageData,
    /// Zlib-compressed 8-bit alpha channel, only when some pixel is not opaque.
    pub alpha: Option<Vec<u8>>,
}

impl DecodedImage {
    /// Size in points at 96 DPI.
    pub fn natural_size(&self) -> (f32, f32) {
        (
            self.width as f32 * 72.0 / PIXELS_PER_INCH,
            self.height as f32 * 72.0 / PIXELS_PER_INCH,
        )
    }
}

/// Decode image bytes of any format the `image` crate reads.
pub fn decode(bytes: &[u8]) -> Result<DecodedImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| ConvertError::render(format!("unrecognised image data: {e}")))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ConvertError::render(format!("undecodable {format:?} image: {e}")))?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(ConvertError::render("image has no pixels"));
    }

    if format == ImageFormat::Jpeg {
        // CMYK and other layouts are re-encoded below
        let color_space = match jpeg_components(bytes) {
            Some(1) => Some(ColorSpace::Gray),
            Some(3) => Some(ColorSpace::Rgb),
            _ => None,
        };
        if let Some(color_space) = color_space {
            return Ok(DecodedImage {
                width,
                height,
                color_space,
                data: ImageData::Jpeg(bytes.to_vec()),
                alpha: None,
            });
        }
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    let mut alpha = Vec::with_capacity(width as usize * height as usize);
    let mut translucent = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        translucent |= a != 255;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    Ok(DecodedImage {
        width,
        height,
        color_space: ColorSpace::Rgb,
        data: ImageData::Flate(compress(&rgb)?),
        alpha: if translucent { Some(compress(&alpha)?) } else { None },
    })
}

pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| ConvertError::render(format!("compressing stream: {e}")))
}

/// Component count from the first SOF marker of a JPEG stream.
fn jpeg_components(bytes: &[u8]) -> Option<u8> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        // Fill bytes and standalone markers carry no length
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            return bytes.get(pos + 9).copied();
        }
        if marker == 0xDA {
            return None;
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).expect("encode");
        out.into_inner()
    }

    #[test]
    fn test_png_becomes_flate_rgb() {
        let png = encode(
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 2, Rgb([10, 20, 30]))),
            ImageFormat::Png,
        );
        let img = decode(&png).expect("decode");
        assert_eq!((img.width, img.height), (4, 2));
        assert_eq!(img.color_space, ColorSpace::Rgb);
        assert!(matches!(img.data, ImageData::Flate(_)));
        assert!(img.alpha.is_none());
    }

    #[test]
    fn test_translucent_png_gets_soft_mask() {
        let png = encode(
            DynamicImage::ImageRgba8(ImageBuffer::from_pixel(3, 3, Rgba([0, 0, 0, 128]))),
            ImageFormat::Png,
        );
        let img = decode(&png).expect("decode");
        assert!(img.alpha.is_some());
    }

    #[test]
    fn test_jpeg_passes_through() {
        let jpeg = encode(
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([200, 100, 50]))),
            ImageFormat::Jpeg,
        );
        let img = decode(&jpeg).expect("decode");
        assert_eq!(img.color_space, ColorSpace::Rgb);
        assert!(matches!(&img.data, ImageData::Jpeg(bytes) if *bytes == jpeg));

        let gray = encode(
            DynamicImage::ImageLuma8(ImageBuffer::from_pixel(8, 8, Luma([90]))),
            ImageFormat::Jpeg,
        );
        assert_eq!(decode(&gray).expect("decode").color_space, ColorSpace::Gray);
    }

    #[test]
    fn test_natural_size_at_96_dpi() {
        let png = encode(
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(96, 48, Rgb([0, 0, 0]))),
            ImageFormat::Png,
        );
        assert_eq!(decode(&png).expect("decode").natural_size(), (72.0, 36.0));
    }

    #[test]
    fn test_garbage_is_render_error() {
        let err = decode(b"\x89PNG\r\n\x1a\nnot really").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RenderError);
        assert!(decode(b"").is_err());
    }
}
