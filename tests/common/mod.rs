#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tempfile::TempDir;
use unwatermark::{
    blending, geometry, ImageDecoder, ItemError, RasterDecoder, SourceFile, WatermarkEngine,
    WatermarkSize,
};

/// Peak opacity of the synthetic logo.
pub const PEAK_ALPHA: f32 = 0.6;

/// Write a radial "logo" capture for `size` into `dir`.
pub fn write_reference(dir: &Path, size: WatermarkSize) {
    let n = size.logo_size();
    #[allow(clippy::cast_precision_loss)]
    let half = n as f32 / 2.0;
    let capture = RgbImage::from_fn(n, n, |x, y| {
        #[allow(clippy::cast_precision_loss)]
        let dist = ((x as f32 + 0.5 - half).powi(2) + (y as f32 + 0.5 - half).powi(2)).sqrt();
        let alpha = (1.0 - dist / half).max(0.0) * PEAK_ALPHA;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let v = (alpha * 255.0).round() as u8;
        Rgb([v, v, v])
    });
    let name = match size {
        WatermarkSize::Small => "bg_48.png",
        WatermarkSize::Large => "bg_96.png",
    };
    capture.save(dir.join(name)).unwrap();
}

/// Engine over a temporary asset directory holding both captures.
pub fn engine() -> (TempDir, Arc<WatermarkEngine>) {
    let dir = tempfile::tempdir().unwrap();
    write_reference(dir.path(), WatermarkSize::Small);
    write_reference(dir.path(), WatermarkSize::Large);
    let engine = Arc::new(WatermarkEngine::new(dir.path()));
    (dir, engine)
}

/// A textured opaque test image.
#[allow(clippy::cast_possible_truncation)]
pub fn scene(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 200) as u8, (y % 180) as u8, ((x + y) % 160) as u8, 255])
    })
}

/// `scene` with the logo stamped where the engine expects it.
pub fn watermarked(engine: &WatermarkEngine, width: u32, height: u32) -> RgbaImage {
    let mut img = scene(width, height);
    let config = geometry::detect_config(width, height);
    let rect = geometry::compute_position(width, height, config).unwrap();
    let map = engine.alpha_maps().get(config.size()).unwrap();
    blending::apply_watermark(&mut img, &map, rect);
    img
}

pub fn encode_png(img: &RgbaImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

pub fn png_file(engine: &WatermarkEngine, name: &str, width: u32, height: u32) -> SourceFile {
    SourceFile::new(name, "image/png", encode_png(&watermarked(engine, width, height)))
}

pub fn corrupt_file(name: &str) -> SourceFile {
    SourceFile::new(name, "image/png", &b"definitely not a png"[..])
}

/// Decoder counting how often it is invoked.
#[derive(Default)]
pub struct CountingDecoder {
    pub calls: AtomicUsize,
}

impl CountingDecoder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RasterDecoder for CountingDecoder {
    fn decode(&self, source: &SourceFile) -> Result<RgbaImage, ItemError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ImageDecoder.decode(source)
    }
}
