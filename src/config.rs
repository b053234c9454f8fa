//! Site configuration module.
//!
//! Handles loading, validating, and layering `imgset.toml`. Values come from
//! three sources, later ones winning:
//!
//! 1. stock defaults ([`SiteConfig::default`])
//! 2. `imgset.toml` in the site root (sparse, merged key by key)
//! 3. command-line overrides ([`Overrides`])
//!
//! The resolved [`SiteConfig`] is immutable for the rest of the build and is
//! passed explicitly to every component that needs it.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [images]
//! widths = [1920, 1440, 1280, 1024, 768, 640, 480, 320]
//! allow_upscale = false
//! filename_mask = "{fn}-{width}.{ext}"
//! output_dir = "assets/_generatedImages"
//! generated_dir = "_generatedImages"
//!
//! [images.aliases]
//! jpg = "jpeg"
//!
//! [images.formats]
//! jpeg = ["webp", "jpeg"]
//! png = ["webp", "png"]
//! webp = ["webp", "jpeg"]
//!
//! [thumbnails]
//! enabled = false
//! max_width = 1280
//! max_height = 720
//! filename_mask = "{fn}-{width}-thumbnail.{ext}"
//!
//! [codecs]
//! filter = "lanczos3"
//! jpeg = { quality = 85 }
//! png = { compression = "default" }
//! avif = { speed = 6, quality = 80 }
//!
//! [catalog]
//! persist = true
//! store_file = ".generatedImages.json"
//! fingerprints_file = ".generatedImages.sources.json"
//!
//! [processing]
//! max_processes = 4         # omit for auto = CPU cores
//! variant_timeout_secs = 60 # omit for no deadline
//! dry_run = false
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::format::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path};
use std::time::Duration;
use thiserror::Error;

/// Name of the config file looked up in the site root.
pub const CONFIG_FILENAME: &str = "imgset.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Build configuration loaded from `imgset.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Width ladder, per-extension formats, naming and output location.
    pub images: ImagesConfig,
    /// Optional aspect-fit thumbnail per format.
    pub thumbnails: ThumbnailsConfig,
    /// Resampling filter and per-format encoder options.
    pub codecs: CodecsConfig,
    /// Where the variant catalog is stored.
    pub catalog: CatalogConfig,
    /// Parallelism, per-variant deadline and dry-run.
    pub processing: ProcessingConfig,
}

/// Responsive variant settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImagesConfig {
    /// Candidate pixel widths. Order is kept; the catalog sorts per format.
    pub widths: Vec<u32>,
    /// Produce variants wider than the source.
    pub allow_upscale: bool,
    /// Source extension → output formats.
    pub formats: BTreeMap<String, Vec<OutputFormat>>,
    /// Source extension → extension whose format list it shares.
    pub aliases: BTreeMap<String, String>,
    /// Variant filename with `{fn}`, `{width}` and `{ext}` placeholders.
    pub filename_mask: String,
    /// Directory (relative to the site root) that receives generated files.
    pub output_dir: String,
    /// Directory name marking generated output. A computed output path may
    /// contain it only once.
    pub generated_dir: String,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        let formats = BTreeMap::from([
            (
                "jpeg".to_string(),
                vec![OutputFormat::Webp, OutputFormat::Jpeg],
            ),
            (
                "png".to_string(),
                vec![OutputFormat::Webp, OutputFormat::Png],
            ),
            (
                "webp".to_string(),
                vec![OutputFormat::Webp, OutputFormat::Jpeg],
            ),
        ]);
        Self {
            widths: vec![1920, 1440, 1280, 1024, 768, 640, 480, 320],
            allow_upscale: false,
            formats,
            aliases: BTreeMap::from([("jpg".to_string(), "jpeg".to_string())]),
            filename_mask: "{fn}-{width}.{ext}".to_string(),
            output_dir: "assets/_generatedImages".to_string(),
            generated_dir: "_generatedImages".to_string(),
        }
    }
}

impl ImagesConfig {
    /// Resolve an extension alias (`jpg` → `jpeg`). Case-insensitive.
    pub fn resolve_extension(&self, ext: &str) -> String {
        let lower = ext.to_ascii_lowercase();
        self.aliases.get(&lower).cloned().unwrap_or(lower)
    }

    /// Output formats for a source extension, after alias resolution.
    pub fn formats_for(&self, ext: &str) -> Option<&[OutputFormat]> {
        self.formats
            .get(&self.resolve_extension(ext))
            .map(Vec::as_slice)
    }

    /// Every source extension the build tracks: format keys plus aliases.
    pub fn tracked_extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self
            .formats
            .keys()
            .chain(self.aliases.keys())
            .cloned()
            .collect();
        exts.sort();
        exts.dedup();
        exts
    }

    pub fn is_tracked(&self, ext: &str) -> bool {
        self.formats_for(ext).is_some()
    }
}

/// Thumbnail settings. The thumbnail is the source fitted into the
/// `max_width` × `max_height` box, aspect preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub enabled: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub filename_mask: String,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_width: 1280,
            max_height: 720,
            filename_mask: "{fn}-{width}-thumbnail.{ext}".to_string(),
        }
    }
}

/// Resampling filter used when resizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    CatmullRom,
    #[default]
    Lanczos3,
}

/// PNG deflate effort.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PngCompression {
    Fast,
    #[default]
    Default,
    Best,
}

/// Encoder options, one table per format that has any.
///
/// WebP output is lossless (the only mode of the pure-Rust encoder) and SVG
/// cannot be produced from raster sources, so neither has a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodecsConfig {
    pub filter: ResizeFilter,
    pub jpeg: JpegOptions,
    pub png: PngOptions,
    pub avif: AvifOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JpegOptions {
    /// 1 (worst) to 100 (best).
    pub quality: u8,
}

impl Default for JpegOptions {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PngOptions {
    pub compression: PngCompression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AvifOptions {
    /// rav1e speed, 1 (slowest) to 10 (fastest).
    pub speed: u8,
    /// 1 (worst) to 100 (best).
    pub quality: u8,
}

impl Default for AvifOptions {
    fn default() -> Self {
        Self {
            speed: 6,
            quality: 80,
        }
    }
}

/// Catalog persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// When false the catalog lives in memory only for the run.
    pub persist: bool,
    /// Store file, relative to the site root.
    pub store_file: String,
    /// Source fingerprint file used to skip unchanged sources.
    pub fingerprints_file: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            persist: true,
            store_file: ".generatedImages.json".to_string(),
            fingerprints_file: ".generatedImages.sources.json".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel transcode workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
    /// Deadline for a single variant. A variant that overruns fails alone.
    pub variant_timeout_secs: Option<u64>,
    /// Log every write instead of performing it.
    pub dry_run: bool,
}

impl ProcessingConfig {
    pub fn variant_timeout(&self) -> Option<Duration> {
        self.variant_timeout_secs.map(Duration::from_secs)
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Overrides {
    pub dry_run: Option<bool>,
    pub allow_upscale: Option<bool>,
    pub thumbnails: Option<bool>,
}

impl SiteConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let images = &self.images;
        if images.widths.is_empty() {
            return Err(ConfigError::Validation(
                "images.widths must not be empty".into(),
            ));
        }
        if images.widths.contains(&0) {
            return Err(ConfigError::Validation(
                "images.widths must be non-zero".into(),
            ));
        }
        for (ext, formats) in &images.formats {
            if formats.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "images.formats.{ext} must list at least one format"
                )));
            }
        }
        for (alias, target) in &images.aliases {
            if !images.formats.contains_key(target) {
                return Err(ConfigError::Validation(format!(
                    "images.aliases.{alias} points to '{target}', which has no formats"
                )));
            }
        }
        validate_mask("images.filename_mask", &images.filename_mask)?;
        validate_mask("thumbnails.filename_mask", &self.thumbnails.filename_mask)?;
        if self.thumbnails.enabled && images.filename_mask == self.thumbnails.filename_mask {
            return Err(ConfigError::Validation(
                "thumbnails.filename_mask must differ from images.filename_mask".into(),
            ));
        }
        if images.generated_dir.is_empty() {
            return Err(ConfigError::Validation(
                "images.generated_dir must not be empty".into(),
            ));
        }
        let token_count = count_components(Path::new(&images.output_dir), &images.generated_dir);
        if token_count != 1 {
            return Err(ConfigError::Validation(format!(
                "images.output_dir '{}' must contain '{}' exactly once",
                images.output_dir, images.generated_dir
            )));
        }
        if self.thumbnails.max_width == 0 || self.thumbnails.max_height == 0 {
            return Err(ConfigError::Validation(
                "thumbnails.max_width and max_height must be non-zero".into(),
            ));
        }
        if !(1..=100).contains(&self.codecs.jpeg.quality) {
            return Err(ConfigError::Validation(
                "codecs.jpeg.quality must be 1-100".into(),
            ));
        }
        if !(1..=100).contains(&self.codecs.avif.quality) {
            return Err(ConfigError::Validation(
                "codecs.avif.quality must be 1-100".into(),
            ));
        }
        if !(1..=10).contains(&self.codecs.avif.speed) {
            return Err(ConfigError::Validation(
                "codecs.avif.speed must be 1-10".into(),
            ));
        }
        if self.processing.variant_timeout_secs == Some(0) {
            return Err(ConfigError::Validation(
                "processing.variant_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file values.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(dry_run) = overrides.dry_run {
            self.processing.dry_run = dry_run;
        }
        if let Some(allow_upscale) = overrides.allow_upscale {
            self.images.allow_upscale = allow_upscale;
        }
        if let Some(thumbnails) = overrides.thumbnails {
            self.thumbnails.enabled = thumbnails;
        }
    }
}

fn validate_mask(key: &str, mask: &str) -> Result<(), ConfigError> {
    for placeholder in ["{fn}", "{width}", "{ext}"] {
        if !mask.contains(placeholder) {
            return Err(ConfigError::Validation(format!(
                "{key} must contain {placeholder}"
            )));
        }
    }
    if mask.contains('/') || mask.contains('\\') {
        return Err(ConfigError::Validation(format!(
            "{key} must be a file name, not a path"
        )));
    }
    Ok(())
}

/// Number of path components equal to `name`.
pub fn count_components(path: &Path, name: &str) -> usize {
    path.components()
        .filter(|c| matches!(c, Component::Normal(s) if *s == name))
        .count()
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(SiteConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `imgset.toml` from the site root as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(site_root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = site_root.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Tables a config file replaces wholesale instead of merging key by key.
///
/// A key-by-key merge would keep stock extensions the user dropped.
const REPLACED_TABLES: &[(&str, &str)] = &[("images", "formats"), ("images", "aliases")];

/// Merge an optional overlay onto a base value, then deserialize.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SiteConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(drop_replaced_tables(base, &ov), ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

fn drop_replaced_tables(mut base: toml::Value, overlay: &toml::Value) -> toml::Value {
    for (section, key) in REPLACED_TABLES {
        let overridden = overlay
            .get(*section)
            .and_then(|table| table.get(*key))
            .is_some();
        if overridden && let Some(toml::Value::Table(table)) = base.get_mut(*section) {
            table.remove(*key);
        }
    }
    base
}

/// Load the config for a site: stock defaults, then `imgset.toml`, then
/// command-line overrides. The result is validated.
pub fn load_config(site_root: &Path, overrides: Overrides) -> Result<SiteConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(site_root)?;
    let mut config = resolve_config(base, overlay)?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Returns a fully-commented stock `imgset.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgset configuration
# ====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.
#
# Place this file at the root of the site as imgset.toml.

# ---------------------------------------------------------------------------
# Responsive variants
# ---------------------------------------------------------------------------
[images]
# Candidate widths in pixels. Widths above the source width are skipped
# unless allow_upscale is set; if none qualify, one variant is produced at
# the source's own width.
widths = [1920, 1440, 1280, 1024, 768, 640, 480, 320]

# Produce variants wider than the source.
allow_upscale = false

# Variant filename. {fn} = source name without extension, {width} = pixel
# width, {ext} = output format. Templates parse the width back out of this
# name, so keep {width} directly before the extension.
filename_mask = "{fn}-{width}.{ext}"

# Where generated files go, relative to the site root.
output_dir = "assets/_generatedImages"

# Directory name marking generated output. Must appear exactly once in
# output_dir; a source whose output path would contain it twice is rejected.
generated_dir = "_generatedImages"

# Extension aliases: sources with the key extension use the value's formats.
[images.aliases]
jpg = "jpeg"

# Output formats per source extension (jpeg, png, webp, avif, svg).
[images.formats]
jpeg = ["webp", "jpeg"]
png = ["webp", "png"]
webp = ["webp", "jpeg"]

# ---------------------------------------------------------------------------
# Thumbnails
# ---------------------------------------------------------------------------
[thumbnails]
# One extra variant per format, fitted into max_width x max_height.
enabled = false
max_width = 1280
max_height = 720
filename_mask = "{fn}-{width}-thumbnail.{ext}"

# ---------------------------------------------------------------------------
# Encoders
# ---------------------------------------------------------------------------
[codecs]
# Resampling filter: nearest, triangle, catmull-rom, lanczos3.
filter = "lanczos3"

[codecs.jpeg]
quality = 85

[codecs.png]
# fast, default, best
compression = "default"

[codecs.avif]
speed = 6
quality = 80

# ---------------------------------------------------------------------------
# Catalog
# ---------------------------------------------------------------------------
[catalog]
# Keep the catalog on disk between builds.
persist = true
store_file = ".generatedImages.json"
fingerprints_file = ".generatedImages.sources.json"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel transcode workers.
# Omit to auto-detect (= number of CPU cores).
# max_processes = 4

# Fail a single variant that takes longer than this. Omit for no deadline.
# variant_timeout_secs = 60

# Log what would be written without touching the disk.
dry_run = false
"##
}
