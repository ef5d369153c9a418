//! Alpha blending math for watermark removal.
//!
//! The logo is applied via forward alpha blending:
//! `watermarked = alpha * 255 + (1 - alpha) * original`
//!
//! This module provides the reverse operation to recover original pixels.

use image::RgbaImage;

use crate::alpha_map::AlphaMap;
use crate::geometry::WatermarkRect;

/// Alpha threshold: ignore pixels with negligible watermark effect (noise).
pub const ALPHA_THRESHOLD: f32 = 0.002;

/// Maximum alpha: clamp to avoid division by near-zero in reverse blending.
pub const MAX_ALPHA: f32 = 0.99;

/// Value of the (white) logo in every colour channel.
const LOGO_VALUE: f32 = 255.0;

/// Forward-blend one channel value with the white logo.
#[must_use]
pub fn blend_channel(original: u8, alpha: f32) -> f32 {
    alpha * LOGO_VALUE + (1.0 - alpha) * f32::from(original)
}

/// Recover one channel value blended with `alpha` (already clamped).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn unblend_channel(watermarked: f32, alpha: f32) -> u8 {
    let original = (watermarked - alpha * LOGO_VALUE) / (1.0 - alpha);
    original.round().clamp(0.0, 255.0) as u8
}

/// Remove the watermark inside `rect` in place.
///
/// Only the RGB channels are corrected; the alpha channel is left untouched.
/// Pixels whose map opacity is below [`ALPHA_THRESHOLD`] are skipped and
/// opacity is clamped to [`MAX_ALPHA`].
///
/// # Panics
///
/// Panics if `rect` does not lie entirely inside `image`, or if the alpha map
/// is smaller than `rect`. Both indicate a geometry bug, not bad input.
pub fn remove_watermark(image: &mut RgbaImage, alpha_map: &AlphaMap, rect: WatermarkRect) {
    assert!(
        rect.fits_within(image.width(), image.height()),
        "watermark rect {rect:?} outside {}x{} raster",
        image.width(),
        image.height()
    );
    assert!(
        rect.width <= alpha_map.width() && rect.height <= alpha_map.height(),
        "alpha map {}x{} smaller than watermark rect",
        alpha_map.width(),
        alpha_map.height()
    );

    for dy in 0..rect.height {
        for dx in 0..rect.width {
            let alpha = alpha_map.get(dx, dy);

            // Skip pixels with negligible watermark effect
            if alpha < ALPHA_THRESHOLD {
                continue;
            }
            let alpha = alpha.min(MAX_ALPHA);

            let px = image.get_pixel_mut(rect.x + dx, rect.y + dy);
            for ch in 0..3 {
                px[ch] = unblend_channel(f32::from(px[ch]), alpha);
            }
        }
    }
}

/// Stamp the white logo into `rect`, the inverse of [`remove_watermark`].
///
/// Useful for building fixtures. Pixels below [`ALPHA_THRESHOLD`] are left as is.
///
/// # Panics
///
/// Same conditions as [`remove_watermark`].
pub fn apply_watermark(image: &mut RgbaImage, alpha_map: &AlphaMap, rect: WatermarkRect) {
    assert!(
        rect.fits_within(image.width(), image.height()),
        "watermark rect {rect:?} outside {}x{} raster",
        image.width(),
        image.height()
    );

    for dy in 0..rect.height {
        for dx in 0..rect.width {
            let alpha = alpha_map.get(dx, dy);
            if alpha < ALPHA_THRESHOLD {
                continue;
            }
            let px = image.get_pixel_mut(rect.x + dx, rect.y + dy);
            for ch in 0..3 {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                {
                    px[ch] = blend_channel(px[ch], alpha).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}
