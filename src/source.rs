//! Submitted files and how they are decoded.

use std::path::Path;

use bytes::Bytes;
use image::{ImageFormat, RgbaImage};

use crate::error::{ItemError, Result};

/// MIME types accepted into a batch.
pub const SUPPORTED_MIME_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

/// A file handed over by the caller: name, declared type and contents.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Original file name, used to derive output names.
    pub name: String,
    /// Declared MIME type.
    pub mime: String,
    /// Raw encoded bytes.
    pub bytes: Bytes,
}

impl SourceFile {
    /// Build from in-memory contents.
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, taking the MIME type from its extension.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |f| f.to_string_lossy().into_owned());
        let mime = mime_from_extension(path).unwrap_or("application/octet-stream");
        Ok(Self::new(name, mime, bytes))
    }

    /// Whether the declared type is one we can process.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        is_supported_mime(&self.mime)
    }
}

/// Check a MIME type against [`SUPPORTED_MIME_TYPES`].
#[must_use]
pub fn is_supported_mime(mime: &str) -> bool {
    SUPPORTED_MIME_TYPES
        .iter()
        .any(|m| m.eq_ignore_ascii_case(mime.trim()))
}

/// MIME type for a path's extension, if it is a supported image.
#[must_use]
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

fn format_for_mime(mime: &str) -> Option<ImageFormat> {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" => Some(ImageFormat::Jpeg),
        "image/webp" => Some(ImageFormat::WebP),
        _ => None,
    }
}

/// Turns a submitted file into an RGBA raster.
pub trait RasterDecoder: Send + Sync {
    /// Decode `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::Decode`] if the bytes are not a valid image.
    fn decode(&self, source: &SourceFile) -> std::result::Result<RgbaImage, ItemError>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl RasterDecoder for ImageDecoder {
    fn decode(&self, source: &SourceFile) -> std::result::Result<RgbaImage, ItemError> {
        let decoded = match format_for_mime(&source.mime) {
            Some(format) => image::load_from_memory_with_format(&source.bytes, format),
            None => image::load_from_memory(&source.bytes),
        };
        decoded
            .map(|img| img.to_rgba8())
            .map_err(|e| ItemError::Decode {
                name: source.name.clone(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn mime_support() {
        assert!(is_supported_mime("image/png"));
        assert!(is_supported_mime("IMAGE/JPEG"));
        assert!(is_supported_mime("image/webp"));
        assert!(!is_supported_mime("image/gif"));
        assert!(!is_supported_mime("text/plain"));
    }

    #[test]
    fn extension_to_mime() {
        assert_eq!(mime_from_extension(Path::new("a.JPG")), Some("image/jpeg"));
        assert_eq!(mime_from_extension(Path::new("a.webp")), Some("image/webp"));
        assert_eq!(mime_from_extension(Path::new("a.bmp")), None);
        assert_eq!(mime_from_extension(Path::new("a")), None);
    }

    #[test]
    fn decodes_png_bytes() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 4]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();

        let decoded = ImageDecoder
            .decode(&SourceFile::new("a.png", "image/png", buf))
            .unwrap();
        assert_eq!(decoded, img);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = ImageDecoder
            .decode(&SourceFile::new("bad.png", "image/png", &b"nope"[..]))
            .unwrap_err();
        assert!(matches!(err, ItemError::Decode { ref name, .. } if name == "bad.png"));
    }

    #[test]
    fn from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpeg");
        std::fs::write(&path, b"xyz").unwrap();
        let file = SourceFile::from_path(&path).unwrap();
        assert_eq!(file.name, "photo.jpeg");
        assert_eq!(file.mime, "image/jpeg");
        assert_eq!(&file.bytes[..], b"xyz");
        assert!(file.is_supported());
    }

    #[test]
    fn from_path_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SourceFile::from_path(&dir.path().join("absent.png")).unwrap_err();
        assert!(matches!(err, crate::Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}
