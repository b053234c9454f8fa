//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Resize** | `DynamicImage::resize`, configurable filter |
//! | **Encode** | `image` codecs: JPEG, PNG, WebP (lossless), AVIF (rav1e) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for width and thumbnail math (unit testable)
//! - **Parameters**: Data structures describing one transcode unit
//! - **Backend**: [`Transcoder`] trait + [`RustTranscoder`]
//! - **Operations**: Backend calls wrapped with mkdir, dry-run and logging

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{Dimensions, TranscodeError, Transcoder};
pub use calculations::{aspect_fit, plan_widths};
pub use operations::{DRY_RUN_HEIGHT, get_dimensions, transcode};
pub use params::{EncodeOptions, Quality, TranscodeParams};
pub use rust_backend::{RustTranscoder, supported_input_extensions};
