//! Variant planning.
//!
//! Given a source's dimensions and extension, decide which (width, format)
//! pairs to render and where the thumbnail box lands. Pure: no I/O, no
//! images, so every rule here is unit tested against plain numbers.
//!
//! ## Rules
//!
//! - The extension is resolved through `images.aliases` before format lookup.
//!   An extension with no format list is a configuration error.
//! - Formats and candidate widths keep their configured order, duplicates
//!   dropped.
//! - A width qualifies when it does not exceed the source width, or when
//!   upscaling is allowed. If none qualifies, one variant at the native width.
//! - With thumbnails enabled, each format gets one extra variant at the
//!   width of the aspect-fit box.

use crate::config::SiteConfig;
use crate::format::OutputFormat;
use crate::imaging::{aspect_fit, plan_widths};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PlanError {
    #[error("no output formats configured for extension '{extension}'")]
    NoFormats { extension: String },
    #[error("source has zero size ({width}x{height})")]
    EmptySource { width: u32, height: u32 },
}

/// One variant to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantSpec {
    pub width: u32,
    pub format: OutputFormat,
    pub thumbnail: bool,
}

/// Everything to render for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Regular variants format by format, then one thumbnail per format.
    pub variants: Vec<VariantSpec>,
    /// Aspect-fit thumbnail box, when thumbnails are enabled.
    pub thumbnail: Option<(u32, u32)>,
}

impl Plan {
    /// Distinct formats in plan order.
    pub fn formats(&self) -> Vec<OutputFormat> {
        let mut formats = Vec::new();
        for spec in &self.variants {
            if !formats.contains(&spec.format) {
                formats.push(spec.format);
            }
        }
        formats
    }

    /// Widths of the regular variants of one format, in plan order.
    pub fn widths(&self, format: OutputFormat) -> Vec<u32> {
        self.variants
            .iter()
            .filter(|v| v.format == format && !v.thumbnail)
            .map(|v| v.width)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

/// Plan the variants for a source of `source` (width, height) pixels with
/// file extension `extension`.
pub fn plan(source: (u32, u32), extension: &str, config: &SiteConfig) -> Result<Plan, PlanError> {
    let (width, height) = source;
    if width == 0 || height == 0 {
        return Err(PlanError::EmptySource { width, height });
    }

    let images = &config.images;
    let configured = images
        .formats_for(extension)
        .ok_or_else(|| PlanError::NoFormats {
            extension: extension.to_ascii_lowercase(),
        })?;
    let mut formats: Vec<OutputFormat> = Vec::with_capacity(configured.len());
    for &format in configured {
        if !formats.contains(&format) {
            formats.push(format);
        }
    }
    if formats.is_empty() {
        return Err(PlanError::NoFormats {
            extension: extension.to_ascii_lowercase(),
        });
    }

    let widths = plan_widths(width, &images.widths, images.allow_upscale);
    trace!(?source, ?widths, ?formats, "planned widths");

    let mut variants: Vec<VariantSpec> = formats
        .iter()
        .flat_map(|&format| {
            widths.iter().map(move |&width| VariantSpec {
                width,
                format,
                thumbnail: false,
            })
        })
        .collect();

    let thumbnail = config.thumbnails.enabled.then(|| {
        aspect_fit(
            source,
            (config.thumbnails.max_width, config.thumbnails.max_height),
            images.allow_upscale,
        )
    });
    if let Some((thumb_width, _)) = thumbnail {
        variants.extend(formats.iter().map(|&format| VariantSpec {
            width: thumb_width,
            format,
            thumbnail: true,
        }));
    }

    Ok(Plan {
        variants,
        thumbnail,
    })
}
