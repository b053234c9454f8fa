//! High-level image operations.
//!
//! These functions wrap a backend call with the filesystem and logging work
//! every caller needs: output directories, dry-run handling, failure logs.

use super::backend::{Dimensions, TranscodeError, Transcoder};
use super::params::TranscodeParams;
use std::path::Path;
use tracing::{debug, error, info};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Height returned for a dry-run transcode. Not a measurement.
pub const DRY_RUN_HEIGHT: u32 = 0;

/// Get image dimensions using the backend.
pub fn get_dimensions(backend: &impl Transcoder, path: &Path) -> Result<Dimensions> {
    backend.identify(path)
}

/// Produce one variant: create the output directory, resize and encode.
///
/// In dry-run mode nothing is read or written; the intended write is logged
/// and [`DRY_RUN_HEIGHT`] is returned. A failure is logged with the output
/// path and returned for this variant only.
pub fn transcode(backend: &impl Transcoder, params: &TranscodeParams, dry_run: bool) -> Result<u32> {
    if dry_run {
        info!(
            output = %params.output.display(),
            width = params.width,
            format = %params.format,
            "dry run: would write variant"
        );
        return Ok(DRY_RUN_HEIGHT);
    }

    let result = write_variant(backend, params);
    match &result {
        Ok(height) => debug!(
            output = %params.output.display(),
            width = params.width,
            height,
            "wrote variant"
        ),
        Err(e) => error!(output = %params.output.display(), error = %e, "variant failed"),
    }
    result
}

fn write_variant(backend: &impl Transcoder, params: &TranscodeParams) -> Result<u32> {
    // Rejected before the directory exists so nothing is left behind
    if !params.format.is_raster() {
        return Err(TranscodeError::Unsupported(params.format));
    }
    if let Some(parent) = params.output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    backend.transcode(params)
}
