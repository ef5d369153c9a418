//! Watermark placement.
//!
//! The logo is stamped at a fixed offset from the bottom-right corner. Only two
//! placements exist, picked purely from the image dimensions.

use crate::error::ItemError;

/// Dimension above which (in both axes) the large logo is used.
const LARGE_THRESHOLD: u32 = 1024;

/// Watermark size classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatermarkSize {
    /// 48x48 watermark, 32px margin (images where either dimension <= 1024).
    Small,
    /// 96x96 watermark, 64px margin (images where both dimensions > 1024).
    Large,
}

impl WatermarkSize {
    /// Placement constants for this size.
    #[must_use]
    pub const fn config(self) -> WatermarkConfig {
        match self {
            Self::Small => WatermarkConfig::SMALL,
            Self::Large => WatermarkConfig::LARGE,
        }
    }

    /// Edge length of the logo in pixels.
    #[must_use]
    pub const fn logo_size(self) -> u32 {
        self.config().logo_size
    }
}

/// Logo size and its distance from the right and bottom edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkConfig {
    /// Edge length of the square logo.
    pub logo_size: u32,
    /// Gap between the logo and the right edge.
    pub margin_right: u32,
    /// Gap between the logo and the bottom edge.
    pub margin_bottom: u32,
}

impl WatermarkConfig {
    /// Placement for images up to 1024px in either dimension.
    pub const SMALL: Self = Self {
        logo_size: 48,
        margin_right: 32,
        margin_bottom: 32,
    };

    /// Placement for images larger than 1024px in both dimensions.
    pub const LARGE: Self = Self {
        logo_size: 96,
        margin_right: 64,
        margin_bottom: 64,
    };

    /// The size class this config belongs to.
    #[must_use]
    pub fn size(&self) -> WatermarkSize {
        if self.logo_size == Self::LARGE.logo_size {
            WatermarkSize::Large
        } else {
            WatermarkSize::Small
        }
    }
}

/// Watermark rectangle in raster pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkRect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl WatermarkRect {
    /// Whether the rectangle lies entirely inside a `width` x `height` raster.
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }
}

/// Determine watermark placement from image dimensions.
///
/// - **Large** (96x96, 64px margin): both width AND height > 1024
/// - **Small** (48x48, 32px margin): otherwise (including 1024x1024)
#[must_use]
pub fn detect_config(width: u32, height: u32) -> WatermarkConfig {
    if width > LARGE_THRESHOLD && height > LARGE_THRESHOLD {
        WatermarkConfig::LARGE
    } else {
        WatermarkConfig::SMALL
    }
}

/// Calculate the watermark rectangle (top-left corner plus logo extent).
///
/// # Errors
///
/// Returns [`ItemError::ImageTooSmall`] when the image cannot hold the logo plus
/// its margins.
pub fn compute_position(
    width: u32,
    height: u32,
    config: WatermarkConfig,
) -> std::result::Result<WatermarkRect, ItemError> {
    let too_small = || ItemError::ImageTooSmall {
        width,
        height,
        logo_size: config.logo_size,
    };
    let x = width
        .checked_sub(config.margin_right + config.logo_size)
        .ok_or_else(too_small)?;
    let y = height
        .checked_sub(config.margin_bottom + config.logo_size)
        .ok_or_else(too_small)?;

    Ok(WatermarkRect {
        x,
        y,
        width: config.logo_size,
        height: config.logo_size,
    })
}
