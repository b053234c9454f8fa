//! Transcoder trait and shared types.
//!
//! The [`Transcoder`] trait defines the two operations the pipeline needs
//! from an image backend: identify (read dimensions) and transcode (resize
//! by width and encode one variant).
//!
//! The production implementation is
//! [`RustTranscoder`](super::rust_backend::RustTranscoder), built on the
//! `image` crate. Tests use a recording mock that can be told to fail
//! individual variants.

use super::params::TranscodeParams;
use crate::format::OutputFormat;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("{0} output cannot be produced from a raster source")]
    Unsupported(OutputFormat),
    #[error("variant exceeded its deadline")]
    TimedOut,
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Backend that reads and re-encodes images.
///
/// `Sync` because one backend instance serves every concurrent variant of a
/// source.
pub trait Transcoder: Sync {
    /// Read image dimensions without a full decode where the format allows.
    fn identify(&self, path: &Path) -> Result<Dimensions, TranscodeError>;

    /// Resize `params.source` to `params.width` (height follows the aspect
    /// ratio), encode as `params.format` and write `params.output`.
    ///
    /// Returns the height of the written image as produced by the resizer.
    /// The output directory is expected to exist.
    fn transcode(&self, params: &TranscodeParams) -> Result<u32, TranscodeError>;
}
