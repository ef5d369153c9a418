//! Remove semi-transparent logo watermarks via reverse alpha blending, in batches.
//!
//! The logo is a white mark blended over the bottom-right corner of an image at
//! one of two fixed placements. This crate reverses the alpha-blending equation
//! to recover the original pixels, using 48x48 and 96x96 alpha maps derived from
//! reference captures of the logo. Everything runs locally.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use unwatermark::{BatchProcessor, OutputFormat, OutputSpec, SourceFile, WatermarkEngine};
//!
//! # async fn demo() -> unwatermark::Result<()> {
//! let engine = Arc::new(WatermarkEngine::new("assets"));
//! let processor = BatchProcessor::new(engine);
//!
//! let files = vec![SourceFile::from_path("photo.jpg".as_ref())?];
//! let summary = processor
//!     .process(files, OutputSpec::new(OutputFormat::Png, 1.0))
//!     .await?;
//! println!("{} of {} done", summary.completed, summary.total);
//!
//! // Change the quality: decoded images are reused, outputs replaced.
//! processor.run(OutputSpec::new(OutputFormat::Jpeg, 0.85)).await?;
//! if let Some(download) = processor.output(0) {
//!     std::fs::write(&download.filename, &download.bytes)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Single images
//!
//! ```no_run
//! use unwatermark::WatermarkEngine;
//!
//! let engine = WatermarkEngine::new("assets");
//! let mut img = image::open("photo.png").unwrap().to_rgba8();
//! engine.remove(&mut img).expect("image too small");
//! img.save("cleaned.png").unwrap();
//! ```

#![deny(missing_docs)]

pub mod alpha_map;
pub mod batch;
pub mod blending;
pub mod encoder;
mod engine;
pub mod error;
pub mod geometry;
pub mod source;
pub mod store;

pub use alpha_map::{AlphaMap, AlphaMapCache, DEFAULT_ASSET_DIR};
pub use batch::{
    BatchOptions, BatchProcessor, Download, ItemStatus, ItemView, Phase, Progress, RunSummary,
};
pub use encoder::{Encoded, Encoder, OutputFormat, OutputSpec, PaletteEncoder};
pub use engine::WatermarkEngine;
pub use error::{Error, ItemError, Notice, Result, SetupError, ValidationError};
pub use geometry::{WatermarkConfig, WatermarkRect, WatermarkSize};
pub use source::{ImageDecoder, RasterDecoder, SourceFile};
pub use store::{Archive, ArchiveEntry, OutputHandle, ResultStore};
