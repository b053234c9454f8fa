//! Pure Rust transcoder on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image` crate (pure Rust decoders) |
//! | Resize | `DynamicImage::resize` with the configured filter |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e) |

use super::backend::{Dimensions, TranscodeError, Transcoder};
use super::params::{EncodeOptions, TranscodeParams};
use crate::config::{PngCompression, ResizeFilter};
use crate::format::OutputFormat;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{self, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::LazyLock;

/// Extensions whose decoders are compiled in.
///
/// AVIF is excluded: the `image` crate's `"avif"` feature only enables the
/// encoder. `ImageFormat::reading_enabled()` returns `true` for AVIF anyway,
/// so it cannot be relied on alone.
const DECODE_CANDIDATES: &[(&str, ImageFormat)] = &[
    ("jpg", ImageFormat::Jpeg),
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("tif", ImageFormat::Tiff),
    ("tiff", ImageFormat::Tiff),
    ("webp", ImageFormat::WebP),
];

static SUPPORTED_EXTENSIONS: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    DECODE_CANDIDATES
        .iter()
        .filter(|(_, fmt)| fmt.reading_enabled())
        .map(|(ext, _)| *ext)
        .collect()
});

/// Returns the set of source extensions that have working decoders compiled in.
pub fn supported_input_extensions() -> &'static [&'static str] {
    &SUPPORTED_EXTENSIONS
}

/// Transcoder using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustTranscoder;

impl RustTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_type(filter: ResizeFilter) -> FilterType {
    match filter {
        ResizeFilter::Nearest => FilterType::Nearest,
        ResizeFilter::Triangle => FilterType::Triangle,
        ResizeFilter::CatmullRom => FilterType::CatmullRom,
        ResizeFilter::Lanczos3 => FilterType::Lanczos3,
    }
}

fn compression_type(compression: PngCompression) -> png::CompressionType {
    match compression {
        PngCompression::Fast => png::CompressionType::Fast,
        PngCompression::Default => png::CompressionType::Default,
        PngCompression::Best => png::CompressionType::Best,
    }
}

/// Load and decode an image from disk.
fn load_image(path: &Path) -> Result<DynamicImage, TranscodeError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| {
            TranscodeError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

fn check_deadline(params: &TranscodeParams) -> Result<(), TranscodeError> {
    if params.past_deadline() {
        return Err(TranscodeError::TimedOut);
    }
    Ok(())
}

/// 8-bit RGB or RGBA, whichever keeps the alpha channel.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

/// Encode `img` as `format` and write it to `path`.
fn save_image(
    img: &DynamicImage,
    path: &Path,
    format: OutputFormat,
    opts: &EncodeOptions,
) -> Result<(), TranscodeError> {
    let writer = BufWriter::new(File::create(path)?);
    let result = match format {
        // JPEG has no alpha channel
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(
            JpegEncoder::new_with_quality(writer, opts.jpeg_quality.value()),
        ),
        OutputFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            writer,
            compression_type(opts.png_compression),
            png::FilterType::Adaptive,
        )),
        OutputFormat::Webp => to_8bit(img).write_with_encoder(WebPEncoder::new_lossless(writer)),
        OutputFormat::Avif => to_8bit(img).write_with_encoder(AvifEncoder::new_with_speed_quality(
            writer,
            opts.avif_speed,
            opts.avif_quality.value(),
        )),
        OutputFormat::Svg => return Err(TranscodeError::Unsupported(format)),
    };
    result.map_err(|e| {
        // Leave no truncated file behind for a later run to mistake for output
        let _ = std::fs::remove_file(path);
        TranscodeError::ProcessingFailed(format!("{} encode failed: {}", format.name(), e))
    })
}

impl Transcoder for RustTranscoder {
    fn identify(&self, path: &Path) -> Result<Dimensions, TranscodeError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            TranscodeError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn transcode(&self, params: &TranscodeParams) -> Result<u32, TranscodeError> {
        if !params.format.is_raster() {
            return Err(TranscodeError::Unsupported(params.format));
        }
        check_deadline(params)?;
        let img = load_image(&params.source)?;
        check_deadline(params)?;

        // Width only: u32::MAX leaves height to the aspect ratio
        let resized = img.resize(
            params.width,
            u32::MAX,
            filter_type(params.encoding.filter),
        );
        check_deadline(params)?;

        save_image(&resized, &params.output, params.format, &params.encoding)?;
        Ok(resized.height())
    }
}
