//! Serialising corrected rasters under a chosen format and quality.

use std::fmt;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};

use crate::error::{ItemError, Notice};

/// Quality at or above which PNG output is written losslessly.
const LOSSLESS_PNG_QUALITY: f32 = 0.999;

/// Quality at or above which the full 256-colour palette is used.
const FULL_PALETTE_QUALITY: f32 = 0.85;

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputFormat {
    /// Portable Network Graphics, keeps alpha.
    #[default]
    Png,
    /// JPEG, flattened onto white.
    Jpeg,
    /// WebP, flattened onto white.
    Webp,
}

impl OutputFormat {
    /// File extension for this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }

    /// MIME type for this format.
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Webp => "WebP",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" | "image/png" => Ok(Self::Png),
            "jpg" | "jpeg" | "image/jpeg" => Ok(Self::Jpeg),
            "webp" | "image/webp" => Ok(Self::Webp),
            other => Err(format!("unknown output format '{other}' (expected png, jpeg or webp)")),
        }
    }
}

/// Format and quality applied to every item of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputSpec {
    /// Target format.
    pub format: OutputFormat,
    /// Quality in `[0, 1]`.
    pub quality: f32,
}

impl OutputSpec {
    /// Build a spec, clamping `quality` into `[0, 1]` (NaN becomes 1).
    #[must_use]
    pub fn new(format: OutputFormat, quality: f32) -> Self {
        let quality = if quality.is_nan() {
            1.0
        } else {
            quality.clamp(0.0, 1.0)
        };
        Self { format, quality }
    }
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self::new(OutputFormat::Png, 1.0)
    }
}

/// Encoded output of one item.
#[derive(Debug, Clone)]
pub struct Encoded {
    /// Encoded file contents.
    pub bytes: Vec<u8>,
    /// Extension matching the format (`png`, `jpg`, `webp`).
    pub extension: &'static str,
    /// Set when the requested encoding had to be degraded.
    pub notice: Option<Notice>,
}

/// Palette-reducing PNG encoder.
pub trait PaletteEncoder: Send + Sync {
    /// Encode `image` as a PNG using at most `max_colors` colours.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; the caller falls back to lossless.
    fn encode(&self, image: &RgbaImage, max_colors: usize) -> Result<Vec<u8>, String>;
}

/// NeuQuant-based palette PNG encoder.
#[cfg(feature = "quantize")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NeuQuantEncoder;

#[cfg(feature = "quantize")]
impl PaletteEncoder for NeuQuantEncoder {
    fn encode(&self, image: &RgbaImage, max_colors: usize) -> Result<Vec<u8>, String> {
        let max_colors = max_colors.clamp(2, 256);
        let quant = color_quant::NeuQuant::new(10, max_colors, image.as_raw());

        let map = quant.color_map_rgba();
        let mut palette = Vec::with_capacity(max_colors * 3);
        let mut trns = Vec::with_capacity(max_colors);
        for entry in map.chunks_exact(4) {
            palette.extend_from_slice(&entry[..3]);
            trns.push(entry[3]);
        }

        #[allow(clippy::cast_possible_truncation)]
        let indices: Vec<u8> = image
            .pixels()
            .map(|px| quant.index_of(&px.0) as u8)
            .collect();

        let mut out = Vec::new();
        let mut encoder = png::Encoder::new(&mut out, image.width(), image.height());
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_palette(palette);
        encoder.set_trns(trns);
        let mut writer = encoder.write_header().map_err(|e| e.to_string())?;
        writer
            .write_image_data(&indices)
            .map_err(|e| e.to_string())?;
        writer.finish().map_err(|e| e.to_string())?;

        Ok(out)
    }
}

/// Encoder for corrected rasters.
#[derive(Clone)]
pub struct Encoder {
    palette: Option<Arc<dyn PaletteEncoder>>,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("palette", &self.palette.is_some())
            .finish()
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    /// Encoder with the built-in palette encoder when compiled in.
    #[must_use]
    pub fn new() -> Self {
        #[cfg(feature = "quantize")]
        {
            Self::with_palette_encoder(Arc::new(NeuQuantEncoder))
        }
        #[cfg(not(feature = "quantize"))]
        {
            Self::without_palette_encoder()
        }
    }

    /// Encoder using a custom palette encoder for lossy PNG.
    #[must_use]
    pub fn with_palette_encoder(palette: Arc<dyn PaletteEncoder>) -> Self {
        Self {
            palette: Some(palette),
        }
    }

    /// Encoder with no palette encoder: lossy PNG always falls back to lossless.
    #[must_use]
    pub fn without_palette_encoder() -> Self {
        Self { palette: None }
    }

    /// Encode `image` under `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::Encode`] if the underlying codec fails.
    pub fn encode(&self, image: &RgbaImage, spec: OutputSpec) -> Result<Encoded, ItemError> {
        let fail = |e: image::ImageError| ItemError::Encode {
            format: spec.format.label(),
            message: e.to_string(),
        };
        let (width, height) = image.dimensions();
        let mut bytes = Vec::new();
        let mut notice = None;

        match spec.format {
            OutputFormat::Jpeg => {
                let flat = flatten_on_white(image);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let quality = (spec.quality * 100.0).round().clamp(1.0, 100.0) as u8;
                JpegEncoder::new_with_quality(&mut Cursor::new(&mut bytes), quality)
                    .encode(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(fail)?;
            }
            OutputFormat::Webp => {
                // The pure-Rust WebP encoder is lossless only; trade detail for
                // size by reducing channel levels first.
                let mut flat = flatten_on_white(image);
                reduce_levels(&mut flat, spec.quality);
                WebPEncoder::new_lossless(Cursor::new(&mut bytes))
                    .encode(flat.as_raw(), width, height, ExtendedColorType::Rgb8)
                    .map_err(fail)?;
            }
            OutputFormat::Png if spec.quality >= LOSSLESS_PNG_QUALITY => {
                write_lossless_png(image, &mut bytes).map_err(fail)?;
            }
            OutputFormat::Png => {
                let max_colors = if spec.quality >= FULL_PALETTE_QUALITY {
                    256
                } else {
                    192
                };
                match self.encode_palette(image, max_colors) {
                    Ok(png) => bytes = png,
                    Err(degraded) => {
                        tracing::debug!(notice = %degraded, "falling back to lossless PNG");
                        write_lossless_png(image, &mut bytes).map_err(fail)?;
                        notice = Some(degraded);
                    }
                }
            }
        }

        Ok(Encoded {
            bytes,
            extension: spec.format.extension(),
            notice,
        })
    }

    fn encode_palette(&self, image: &RgbaImage, max_colors: usize) -> Result<Vec<u8>, Notice> {
        let palette = self.palette.as_ref().ok_or(Notice::QuantizerUnavailable)?;
        match panic::catch_unwind(AssertUnwindSafe(|| palette.encode(image, max_colors))) {
            Ok(Ok(png)) => Ok(png),
            Ok(Err(message)) => Err(Notice::QuantizerFailed(message)),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "palette encoder panicked".to_string());
                Err(Notice::QuantizerFailed(message))
            }
        }
    }
}

fn write_lossless_png(image: &RgbaImage, out: &mut Vec<u8>) -> image::ImageResult<()> {
    out.clear();
    PngEncoder::new(Cursor::new(out)).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )
}

/// Composite onto an opaque white background.
#[must_use]
pub fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let alpha = f32::from(px[3]) / 255.0;
        let mut out = [0u8; 3];
        for (ch, value) in out.iter_mut().enumerate() {
            let blended = f32::from(px[ch]) * alpha + 255.0 * (1.0 - alpha);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                *value = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
        image::Rgb(out)
    })
}

/// Snap every channel to one of `2 + quality^2 * 254` evenly spaced levels.
fn reduce_levels(image: &mut RgbImage, quality: f32) {
    if quality >= LOSSLESS_PNG_QUALITY {
        return;
    }
    let levels = (2.0 + quality * quality * 254.0).round().clamp(2.0, 256.0);
    let step = 255.0 / (levels - 1.0);
    for channel in image.iter_mut() {
        let bucket = (f32::from(*channel) / step).round();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            *channel = (bucket * step).round().clamp(0.0, 255.0) as u8;
        }
    }
}
