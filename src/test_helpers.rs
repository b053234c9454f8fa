//! Shared test utilities for the imgset test suite.
//!
//! Provides synthetic image writers and a throwaway site layout so tests can
//! exercise the real decoders without checked-in fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let site = setup_site(&[("blog/cat.jpg", 1000, 500)]);
//! let entry = find_entry(&catalog, "/blog/cat.jpg");
//! assert_eq!(widths_of(entry, OutputFormat::Webp), vec![480]);
//! ```

use std::path::Path;
use tempfile::TempDir;

use crate::catalog::{Catalog, CatalogEntry};
use crate::format::OutputFormat;
use image::{ImageEncoder, RgbImage, RgbaImage};

// =========================================================================
// Synthetic images
// =========================================================================

/// Write a small valid JPEG with the given dimensions, creating parents.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

/// Write a small valid RGBA PNG with the given dimensions, creating parents.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 64, 200])
    });
    img.save_with_format(path, image::ImageFormat::Png).unwrap();
}

// =========================================================================
// Site setup
// =========================================================================

/// Create a site root holding JPEG or PNG sources at the given relative
/// paths. The format follows the extension.
pub fn setup_site(sources: &[(&str, u32, u32)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (rel, width, height) in sources {
        let path = tmp.path().join(rel);
        if rel.ends_with(".png") {
            create_test_png(&path, *width, *height);
        } else {
            create_test_jpeg(&path, *width, *height);
        }
    }
    tmp
}

// =========================================================================
// Catalog lookups, panicking with the available keys on a miss
// =========================================================================

/// Find a catalog entry by source path. Panics if not found.
pub fn find_entry<'a>(catalog: &'a Catalog, source: &str) -> &'a CatalogEntry {
    catalog.get(source).unwrap_or_else(|| {
        let keys: Vec<&str> = catalog.iter().map(|(k, _)| k).collect();
        panic!("source '{source}' not in catalog. Available: {keys:?}")
    })
}

/// Widths recorded for one format, ascending. Empty if the format is absent.
pub fn widths_of(entry: &CatalogEntry, format: OutputFormat) -> Vec<u32> {
    entry.format(format).map(|v| v.widths()).unwrap_or_default()
}
