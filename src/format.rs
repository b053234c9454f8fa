//! Output formats a variant can be encoded to.
//!
//! The lowercase name of each format doubles as its file extension, its key
//! in the catalog, and its spelling in `imgset.toml`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Target encoding of a generated variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Svg,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Svg,
    ];

    /// Name used in config files, catalog keys and file extensions.
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Svg => "svg",
        }
    }

    /// Extension written into generated filenames.
    pub fn extension(self) -> &'static str {
        self.name()
    }

    /// MIME type for `<source type="…">` attributes.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Svg => "image/svg+xml",
        }
    }

    /// Whether raster input can be encoded to this format.
    pub fn is_raster(self) -> bool {
        !matches!(self, OutputFormat::Svg)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown output format: {0}")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        OutputFormat::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or(UnknownFormat(s.to_string()))
    }
}
