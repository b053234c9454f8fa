//! Parameter types for transcode operations.
//!
//! These structs describe *what* to produce, not *how*. They are the
//! interface between the pipeline (which decides which variants to create)
//! and the [`backend`](super::backend) (which does the pixel work), so the
//! backend can be swapped for a mock in tests.

use crate::config::{CodecsConfig, PngCompression, ResizeFilter};
use crate::format::OutputFormat;
use std::path::PathBuf;
use std::time::Instant;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Encoder settings shared by every variant of a build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeOptions {
    pub filter: ResizeFilter,
    pub jpeg_quality: Quality,
    pub png_compression: PngCompression,
    /// rav1e speed, 1-10.
    pub avif_speed: u8,
    pub avif_quality: Quality,
}

impl EncodeOptions {
    pub fn from_codecs(codecs: &CodecsConfig) -> Self {
        Self {
            filter: codecs.filter,
            jpeg_quality: Quality::new(codecs.jpeg.quality),
            png_compression: codecs.png.compression,
            avif_speed: codecs.avif.speed.clamp(1, 10),
            avif_quality: Quality::new(codecs.avif.quality),
        }
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::from_codecs(&CodecsConfig::default())
    }
}

/// One resize-and-encode unit.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Target width. Height follows the source aspect ratio.
    pub width: u32,
    pub format: OutputFormat,
    pub encoding: EncodeOptions,
    /// Past this instant the unit gives up between stages.
    pub deadline: Option<Instant>,
}

impl TranscodeParams {
    pub fn past_deadline(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }
}
