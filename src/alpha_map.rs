//! Per-pixel opacity of the watermark logo.
//!
//! The reference assets are captures of the logo rendered over black. Since the
//! logo is pure white, the brightest channel of each captured pixel is the
//! logo's opacity at that pixel: `alpha = max(R, G, B) / 255.0`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use once_cell::sync::OnceCell;

use crate::error::SetupError;
use crate::geometry::WatermarkSize;

/// Default location of the reference captures, relative to the working directory.
pub const DEFAULT_ASSET_DIR: &str = "assets";

/// Immutable opacity grid, row-major, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl AlphaMap {
    /// Derive an alpha map from a reference capture.
    #[must_use]
    pub fn from_reference(reference: &DynamicImage) -> Self {
        let rgb = reference.to_rgb8();
        let values = rgb
            .pixels()
            .map(|px| f32::from(px[0].max(px[1]).max(px[2])) / 255.0)
            .collect();

        Self {
            width: rgb.width(),
            height: rgb.height(),
            values,
        }
    }

    /// Build from raw values. Returns `None` if `values` does not hold exactly
    /// `width * height` entries in `[0, 1]`.
    #[must_use]
    pub fn from_values(width: u32, height: u32, values: Vec<f32>) -> Option<Self> {
        let expected = width as usize * height as usize;
        if values.len() != expected || values.iter().any(|a| !(0.0..=1.0).contains(a)) {
            return None;
        }
        Some(Self {
            width,
            height,
            values,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Opacity at local position `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the map.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> f32 {
        assert!(x < self.width && y < self.height, "alpha map index out of range");
        self.values[(y * self.width + x) as usize]
    }

    /// Row-major opacity values.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

/// File name of the reference capture for a watermark size.
#[must_use]
pub fn asset_file_name(size: WatermarkSize) -> &'static str {
    match size {
        WatermarkSize::Small => "bg_48.png",
        WatermarkSize::Large => "bg_96.png",
    }
}

/// Load and validate one reference capture.
///
/// # Errors
///
/// Returns a [`SetupError`] telling apart a missing file, a file the host
/// refuses to let us read, an undecodable file and one with the wrong size.
pub fn load_reference(path: &Path, size: WatermarkSize) -> Result<AlphaMap, SetupError> {
    let bytes = fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => SetupError::AssetMissing {
            path: path.to_path_buf(),
        },
        ErrorKind::PermissionDenied => SetupError::AccessDenied {
            path: path.to_path_buf(),
        },
        _ => SetupError::AssetRead {
            path: path.to_path_buf(),
            source,
        },
    })?;

    let reference =
        image::load_from_memory(&bytes).map_err(|source| SetupError::AssetDecode {
            path: path.to_path_buf(),
            source,
        })?;

    let expected = size.logo_size();
    if reference.width() != expected || reference.height() != expected {
        return Err(SetupError::AssetDimensions {
            path: path.to_path_buf(),
            expected,
            width: reference.width(),
            height: reference.height(),
        });
    }

    Ok(AlphaMap::from_reference(&reference))
}

/// Lazily built, never rebuilt, alpha maps for both logo sizes.
///
/// Each map is constructed on first request and then shared read-only for the
/// lifetime of the cache. A failed load leaves the slot empty so no partial map
/// is ever observed.
#[derive(Debug)]
pub struct AlphaMapCache {
    dir: PathBuf,
    small: OnceCell<Arc<AlphaMap>>,
    large: OnceCell<Arc<AlphaMap>>,
}

impl AlphaMapCache {
    /// Cache reading `bg_48.png` and `bg_96.png` from `dir` on demand.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            small: OnceCell::new(),
            large: OnceCell::new(),
        }
    }

    /// Cache pre-populated with already built maps.
    ///
    /// # Panics
    ///
    /// Panics if the maps are not 48x48 and 96x96 respectively.
    #[must_use]
    pub fn from_maps(small: AlphaMap, large: AlphaMap) -> Self {
        assert_eq!((small.width, small.height), (48, 48), "small alpha map must be 48x48");
        assert_eq!((large.width, large.height), (96, 96), "large alpha map must be 96x96");
        Self {
            dir: PathBuf::new(),
            small: OnceCell::with_value(Arc::new(small)),
            large: OnceCell::with_value(Arc::new(large)),
        }
    }

    /// Directory the reference captures are read from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Alpha map for `size`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns the [`SetupError`] from loading the reference capture.
    pub fn get(&self, size: WatermarkSize) -> Result<Arc<AlphaMap>, SetupError> {
        let slot = match size {
            WatermarkSize::Small => &self.small,
            WatermarkSize::Large => &self.large,
        };
        slot.get_or_try_init(|| {
            let path = self.dir.join(asset_file_name(size));
            tracing::debug!(path = %path.display(), "building alpha map");
            load_reference(&path, size).map(Arc::new)
        })
        .cloned()
    }

    /// Build both maps now so setup problems surface before any processing.
    ///
    /// # Errors
    ///
    /// Returns the first [`SetupError`] encountered.
    pub fn ensure_loaded(&self) -> Result<(), SetupError> {
        self.get(WatermarkSize::Small)?;
        self.get(WatermarkSize::Large)?;
        Ok(())
    }
}

impl Default for AlphaMapCache {
    fn default() -> Self {
        Self::from_dir(DEFAULT_ASSET_DIR)
    }
}
