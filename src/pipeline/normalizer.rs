//! Decode, size-gate and re-encode downloaded images.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};
use thiserror::Error;

use super::PolicyError;

/// Canonical output format for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Flattened onto white, no alpha.
    Jpeg { quality: u8 },
    /// Alpha kept when the source has it.
    Png,
    /// Original bytes, unchanged.
    Passthrough,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jpeg { quality } => write!(f, "jpeg q{}", quality),
            Self::Png => f.write_str("png"),
            Self::Passthrough => f.write_str("original"),
        }
    }
}

/// Minimum size and output format, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaPolicy {
    min_width: u32,
    min_height: u32,
    format: OutputFormat,
}

impl MediaPolicy {
    pub fn new(min_width: u32, min_height: u32, format: OutputFormat) -> Result<Self, PolicyError> {
        if let OutputFormat::Jpeg { quality } = format {
            if !(1..=100).contains(&quality) {
                return Err(PolicyError::JpegQuality(quality));
            }
        }
        Ok(Self {
            min_width,
            min_height,
            format,
        })
    }

    pub fn min_width(&self) -> u32 {
        self.min_width
    }

    pub fn min_height(&self) -> u32 {
        self.min_height
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }
}

/// Why downloaded bytes did not become an artifact.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("not an image (detected {0})")]
    NotAnImage(String),

    #[error("cannot decode image: {0}")]
    Undecodable(String),

    #[error("{width}x{height} is below the {min_width}x{min_height} minimum")]
    TooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },

    #[error("cannot encode image: {0}")]
    Encode(String),
}

/// Encoded image ready to be written.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// File extension without the dot.
    pub extension: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    policy: MediaPolicy,
}

impl Normalizer {
    pub fn new(policy: MediaPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &MediaPolicy {
        &self.policy
    }

    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, Rejection> {
        match infer::get(bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => {}
            Some(kind) => return Err(Rejection::NotAnImage(kind.mime_type().to_string())),
            None => return Err(Rejection::NotAnImage("unknown".to_string())),
        }

        let image = image::load_from_memory(bytes).map_err(|e| Rejection::Undecodable(e.to_string()))?;
        let (width, height) = image.dimensions();
        if width < self.policy.min_width || height < self.policy.min_height {
            return Err(Rejection::TooSmall {
                width,
                height,
                min_width: self.policy.min_width,
                min_height: self.policy.min_height,
            });
        }

        let (bytes, extension) = match self.policy.format {
            OutputFormat::Jpeg { quality } => (encode_jpeg(&image, quality)?, "jpg"),
            OutputFormat::Png => (encode_png(&image)?, "png"),
            OutputFormat::Passthrough => (bytes.to_vec(), passthrough_extension(bytes)),
        };

        Ok(NormalizedImage {
            bytes,
            width,
            height,
            extension,
        })
    }
}

/// Composite any alpha onto opaque white, producing RGB.
///
/// A plain RGBA → RGB conversion drops alpha and leaves whatever color sits
/// under transparent pixels (usually black) visible.
pub fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }

    let rgba = image.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let a = u16::from(a);
        let blend = |c: u8| ((u16::from(c) * a + 255 * (255 - a) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, Rejection> {
    let rgb = DynamicImage::ImageRgb8(flatten_onto_white(image));
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))
        .map_err(|e| Rejection::Encode(e.to_string()))?;
    Ok(buf)
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, Rejection> {
    let converted = if image.color().has_alpha() {
        DynamicImage::ImageRgba8(image.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(image.to_rgb8())
    };
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Fast, FilterType::Adaptive);
    converted
        .write_with_encoder(encoder)
        .map_err(|e| Rejection::Encode(e.to_string()))?;
    Ok(buf)
}

fn passthrough_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::Gif) => "gif",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Bmp) => "bmp",
        Ok(ImageFormat::Tiff) => "tiff",
        Ok(ImageFormat::Ico) => "ico",
        _ => "img",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn solid(width: u32, height: u32) -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([10, 120, 200]),
        )))
    }

    /// Opaque red square with a fully transparent border.
    fn bordered_rgba(size: u32, border: u32) -> Vec<u8> {
        let img: RgbaImage = ImageBuffer::from_fn(size, size, |x, y| {
            let edge = x < border || y < border || x >= size - border || y >= size - border;
            if edge {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([255, 0, 0, 255])
            }
        });
        png_bytes(DynamicImage::ImageRgba8(img))
    }

    fn normalizer(min: u32, format: OutputFormat) -> Normalizer {
        Normalizer::new(MediaPolicy::new(min, min, format).unwrap())
    }

    #[test]
    fn test_minimum_size_boundary() {
        let n = normalizer(300, OutputFormat::Png);
        assert_eq!(
            n.normalize(&solid(299, 300)).unwrap_err(),
            Rejection::TooSmall {
                width: 299,
                height: 300,
                min_width: 300,
                min_height: 300
            }
        );
        assert!(n.normalize(&solid(300, 299)).is_err());

        let out = n.normalize(&solid(300, 300)).unwrap();
        assert_eq!((out.width, out.height), (300, 300));
    }

    #[test]
    fn test_jpeg_composites_transparency_onto_white() {
        let n = normalizer(1, OutputFormat::Jpeg { quality: 95 });
        // Border covers whole 16x16 MCUs so compression cannot bleed red into it.
        let out = n.normalize(&bordered_rgba(48, 16)).unwrap();
        assert_eq!(out.extension, "jpg");

        let decoded = image::load_from_memory(&out.bytes).unwrap().to_rgb8();
        for (x, y) in [(0, 0), (47, 0), (0, 47), (47, 47)] {
            let px = decoded.get_pixel(x, y).0;
            assert!(px.iter().all(|c| *c >= 245), "corner ({x},{y}) is {px:?}");
        }
        let center = decoded.get_pixel(24, 24).0;
        assert!(center[0] > 200 && center[1] < 60 && center[2] < 60);
    }

    #[test]
    fn test_png_keeps_alpha() {
        let n = normalizer(1, OutputFormat::Png);
        let out = n.normalize(&bordered_rgba(16, 4)).unwrap();

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert!(decoded.color().has_alpha());
        assert_eq!(decoded.to_rgba8().get_pixel(0, 0).0[3], 0);
        assert_eq!(decoded.to_rgba8().get_pixel(8, 8).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_png_without_alpha_stays_rgb() {
        let n = normalizer(1, OutputFormat::Png);
        let out = n.normalize(&solid(8, 8)).unwrap();
        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn test_passthrough_keeps_bytes() {
        let bytes = solid(10, 10);
        let out = normalizer(1, OutputFormat::Passthrough).normalize(&bytes).unwrap();
        assert_eq!(out.bytes, bytes);
        assert_eq!(out.extension, "png");
    }

    #[test]
    fn test_rejects_non_images() {
        let n = normalizer(1, OutputFormat::Png);
        assert!(matches!(
            n.normalize(b"<html><body>nope</body></html>"),
            Err(Rejection::NotAnImage(_))
        ));

        // PNG signature followed by garbage.
        let mut broken = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        broken.extend_from_slice(&[0u8; 64]);
        assert!(matches!(n.normalize(&broken), Err(Rejection::Undecodable(_))));
    }

    #[test]
    fn test_invalid_quality() {
        assert_eq!(
            MediaPolicy::new(1, 1, OutputFormat::Jpeg { quality: 101 }),
            Err(PolicyError::JpegQuality(101))
        );
    }

    #[test]
    fn test_flatten_half_transparent() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 128])));
        let flat = flatten_onto_white(&img);
        let px = flat.get_pixel(0, 0).0;
        assert!(px.iter().all(|c| (126..=128).contains(c)));
    }
}
