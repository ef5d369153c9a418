//! Error types for the unwatermark crate.
//!
//! Failures fall into four groups. [`SetupError`] and [`ValidationError`] abort a
//! batch before any item is processed. [`ItemError`] is confined to one item of a
//! batch. [`Notice`] is a non-fatal degradation (the result is still produced).

use std::fmt;
use std::path::PathBuf;

/// Errors returned by the public API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reference watermark assets could not be prepared. Fatal to the run.
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// The submitted batch was rejected before any item was created.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reference assets (the captured 48x48 and 96x96 logos) are unusable.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The asset file does not exist.
    #[error("watermark reference asset missing: {}", path.display())]
    AssetMissing {
        /// Expected asset location.
        path: PathBuf,
    },

    /// The asset exists but the host refused to let us read its pixels.
    #[error("access to watermark reference asset blocked by host security policy: {}", path.display())]
    AccessDenied {
        /// Asset location.
        path: PathBuf,
    },

    /// The asset could not be read for another I/O reason.
    #[error("failed to read watermark reference asset {}: {source}", path.display())]
    AssetRead {
        /// Asset location.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The asset bytes are not a decodable image.
    #[error("failed to decode watermark reference asset {}: {source}", path.display())]
    AssetDecode {
        /// Asset location.
        path: PathBuf,
        /// Underlying decoder error.
        source: image::ImageError,
    },

    /// The asset decoded to the wrong size.
    #[error("watermark reference asset {} is {width}x{height}, expected {expected}x{expected}", path.display())]
    AssetDimensions {
        /// Asset location.
        path: PathBuf,
        /// Expected edge length.
        expected: u32,
        /// Actual width.
        width: u32,
        /// Actual height.
        height: u32,
    },
}

/// A batch was refused before processing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No files were submitted.
    #[error("no files selected")]
    EmptyBatch,

    /// More files than a single batch accepts.
    #[error("too many files: {count} selected, at most {max} per batch")]
    TooManyFiles {
        /// Number of supported files submitted.
        count: usize,
        /// Batch limit.
        max: usize,
    },

    /// None of the submitted files has a supported type.
    #[error("no supported images among {rejected} file(s); expected PNG, JPEG or WebP")]
    NoSupportedFiles {
        /// Number of files that were rejected.
        rejected: usize,
    },
}

/// Failure of a single batch item. Never aborts the rest of the batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    /// The source bytes could not be decoded.
    #[error("failed to decode {name}: {message}")]
    Decode {
        /// Source file name.
        name: String,
        /// Decoder message.
        message: String,
    },

    /// The image is too small to contain a watermark at the expected position.
    #[error("image too small ({width}x{height}) for {logo_size}x{logo_size} watermark")]
    ImageTooSmall {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
        /// Expected watermark size in pixels.
        logo_size: u32,
    },

    /// The corrected raster could not be encoded.
    #[error("failed to encode {format}: {message}")]
    Encode {
        /// Target format label.
        format: &'static str,
        /// Encoder message.
        message: String,
    },

    /// The run could not prepare its reference assets.
    #[error("setup failed: {0}")]
    Setup(String),
}

/// Non-fatal encode degradation, reported once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The palette PNG encoder is not compiled in; lossless PNG was written.
    QuantizerUnavailable,
    /// The palette PNG encoder failed; lossless PNG was written.
    QuantizerFailed(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QuantizerUnavailable => f.write_str(
                "palette PNG compression unavailable; saved lossless PNG (larger files)",
            ),
            Self::QuantizerFailed(msg) => write!(
                f,
                "palette PNG compression failed ({msg}); saved lossless PNG (larger files)"
            ),
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
