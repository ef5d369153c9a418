//! Core watermark removal engine.

use std::path::PathBuf;

use image::RgbaImage;

use crate::alpha_map::AlphaMapCache;
use crate::blending;
use crate::error::{ItemError, SetupError};
use crate::geometry::{self, WatermarkRect};

/// The watermark engine holding the alpha maps.
///
/// Create once and share (it is `Sync`) for every image of every batch. The
/// alpha maps are built lazily from the reference captures on first use and
/// never rebuilt.
#[derive(Debug, Default)]
pub struct WatermarkEngine {
    alpha_maps: AlphaMapCache,
}

impl WatermarkEngine {
    /// Engine reading reference captures from `asset_dir`.
    pub fn new(asset_dir: impl Into<PathBuf>) -> Self {
        Self {
            alpha_maps: AlphaMapCache::from_dir(asset_dir),
        }
    }

    /// Engine over an existing alpha map cache.
    #[must_use]
    pub fn with_alpha_maps(alpha_maps: AlphaMapCache) -> Self {
        Self { alpha_maps }
    }

    /// The alpha map cache.
    #[must_use]
    pub fn alpha_maps(&self) -> &AlphaMapCache {
        &self.alpha_maps
    }

    /// Build both alpha maps if not built yet.
    ///
    /// # Errors
    ///
    /// Returns the [`SetupError`] for the first unusable reference capture.
    pub fn prepare(&self) -> Result<(), SetupError> {
        self.alpha_maps.ensure_loaded()
    }

    /// Resolve the watermark rectangle for an image of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::ImageTooSmall`] if the logo does not fit.
    pub fn locate(&self, width: u32, height: u32) -> Result<WatermarkRect, ItemError> {
        geometry::compute_position(width, height, geometry::detect_config(width, height))
    }

    /// Remove the watermark from an image in place.
    ///
    /// Returns the rectangle that was corrected.
    ///
    /// # Errors
    ///
    /// Returns [`ItemError::ImageTooSmall`] if the logo does not fit, or
    /// [`ItemError::Setup`] if the matching alpha map cannot be built.
    pub fn remove(&self, image: &mut RgbaImage) -> Result<WatermarkRect, ItemError> {
        let (width, height) = image.dimensions();
        let config = geometry::detect_config(width, height);
        let rect = geometry::compute_position(width, height, config)?;
        let alpha_map = self
            .alpha_maps
            .get(config.size())
            .map_err(|e| ItemError::Setup(e.to_string()))?;

        blending::remove_watermark(image, &alpha_map, rect);
        Ok(rect)
    }
}
