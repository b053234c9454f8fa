//! Per-source processing pipeline.
//!
//! Stage 2 of a build, called once per source image by the driver:
//!
//! ```text
//! identify → plan → check paths → transcode (parallel) → aggregate → persist → copy
//! ```
//!
//! ## Outputs
//!
//! For `blog/cat.jpg` (1000×500) with the stock config, the pipeline writes
//!
//! ```text
//! assets/_generatedImages/blog/cat-1000.webp   (no ladder width fits, native width)
//! assets/_generatedImages/blog/cat-1000.jpeg
//! <output>/blog/cat.jpg                        (untouched copy)
//! ```
//!
//! and records them in the [`Catalog`] under `/blog/cat.jpg`.
//!
//! ## Failure handling
//!
//! - Unreadable source, unknown extension, or an output path that repeats the
//!   generated directory: the image fails before anything is written and the
//!   driver moves on.
//! - A single variant failing (codec error, timeout) only removes that
//!   variant; its siblings are still written and recorded, and the failure
//!   shows up in the [`ProcessReport`].
//! - A catalog save failure is fatal for the build ([`PipelineError::is_fatal`]).
//!
//! ## Parallel Processing
//!
//! The variants of one source run on the rayon pool with a full join. The
//! catalog sits behind a mutex, so a driver may also process several sources
//! in parallel on the same pipeline.

use crate::catalog::{Catalog, CatalogEntry, CatalogError, GeneratedVariant};
use crate::config::{SiteConfig, count_components};
use crate::imaging::{
    EncodeOptions, TranscodeError, TranscodeParams, Transcoder, get_dimensions, transcode,
};
use crate::naming::render_mask;
use crate::plan::{PlanError, VariantSpec, plan};
use rayon::prelude::*;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, info_span, trace, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot read source {path}: {reason}")]
    SourceRead { path: PathBuf, reason: String },
    #[error("output path {path} contains '{token}' more than once")]
    PathInvariant { path: PathBuf, token: String },
    #[error("cannot plan variants for {path}: {source}")]
    Plan {
        path: PathBuf,
        #[source]
        source: PlanError,
    },
    #[error("cannot persist catalog: {0}")]
    Persist(#[from] CatalogError),
    #[error("cannot copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Whether the build must stop. Everything except a lost catalog only
    /// affects the current image.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Persist(_))
    }
}

/// A source image located relative to the site root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub absolute: PathBuf,
    /// `/`-separated with a leading slash: `/blog/cat.jpg`. The catalog key.
    pub relative: String,
    /// File name without extension.
    pub stem: String,
    /// Lower-cased extension, before alias resolution.
    pub extension: String,
}

impl SourceImage {
    pub fn new(site_root: &Path, path: &Path) -> Result<Self, PipelineError> {
        let absolute = site_root.join(path);
        let read_err = |reason: &str| PipelineError::SourceRead {
            path: absolute.clone(),
            reason: reason.to_string(),
        };

        let relative = absolute
            .strip_prefix(site_root)
            .map_err(|_| read_err("not under the site root"))?;
        let stem = absolute
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| read_err("no file name"))?;
        let extension = absolute
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .ok_or_else(|| read_err("no file extension"))?;

        Ok(Self {
            relative: format!("/{}", slash_path(relative)),
            absolute,
            stem,
            extension,
        })
    }

    /// Directory of the source relative to the site root.
    fn relative_dir(&self) -> PathBuf {
        Path::new(self.relative.trim_start_matches('/'))
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// Join the normal components of `path` with `/`.
fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Events and reports
// ============================================================================

/// Progress events for the CLI printer.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    ImageProcessed {
        source: String,
        dimensions: (u32, u32),
        variants: Vec<VariantInfo>,
    },
    ImageSkipped {
        source: String,
    },
    ImageFailed {
        source: String,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    /// `480px webp` or `thumbnail webp`.
    pub label: String,
    pub status: VariantStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariantStatus {
    Written,
    DryRun,
    Failed(String),
}

/// Outcome of one transcode unit.
#[derive(Debug)]
pub struct UnitOutcome {
    pub spec: VariantSpec,
    /// Output path relative to the site root.
    pub path: String,
    /// Reported height, or why the unit failed.
    pub result: Result<u32, TranscodeError>,
}

impl UnitOutcome {
    fn label(&self) -> String {
        if self.spec.thumbnail {
            format!("thumbnail {}", self.spec.format)
        } else {
            format!("{}px {}", self.spec.width, self.spec.format)
        }
    }
}

/// What [`Pipeline::process`] did for one source.
#[derive(Debug)]
pub struct ProcessReport {
    pub source: String,
    pub skipped: bool,
    pub dry_run: bool,
    pub dimensions: Option<(u32, u32)>,
    /// Plan order.
    pub outcomes: Vec<UnitOutcome>,
    /// The entry built from successful units. Also in the catalog unless
    /// this was a dry run or a skip.
    pub entry: Option<CatalogEntry>,
    pub copied_to: PathBuf,
}

impl ProcessReport {
    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    fn event(&self) -> ProcessEvent {
        if self.skipped {
            return ProcessEvent::ImageSkipped {
                source: self.source.clone(),
            };
        }
        let variants = self
            .outcomes
            .iter()
            .map(|o| VariantInfo {
                label: o.label(),
                status: match &o.result {
                    Ok(_) if self.dry_run => VariantStatus::DryRun,
                    Ok(_) => VariantStatus::Written,
                    Err(e) => VariantStatus::Failed(e.to_string()),
                },
            })
            .collect();
        ProcessEvent::ImageProcessed {
            source: self.source.clone(),
            dimensions: self.dimensions.unwrap_or_default(),
            variants,
        }
    }
}

/// Running totals for a build, printed at the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildStats {
    pub processed: u32,
    pub unchanged: u32,
    pub variants_written: u32,
    pub variants_failed: u32,
    pub images_failed: u32,
}

impl BuildStats {
    pub fn record(&mut self, report: &ProcessReport) {
        if report.skipped {
            self.unchanged += 1;
            return;
        }
        self.processed += 1;
        self.variants_written += report.written() as u32;
        self.variants_failed += report.failures().count() as u32;
    }

    pub fn record_failure(&mut self) {
        self.images_failed += 1;
    }

    pub fn total(&self) -> u32 {
        self.processed + self.unchanged + self.images_failed
    }
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed, {} unchanged ({} variants written",
            self.processed, self.unchanged, self.variants_written
        )?;
        if self.variants_failed > 0 {
            write!(f, ", {} failed", self.variants_failed)?;
        }
        write!(f, ")")?;
        if self.images_failed > 0 {
            write!(f, ", {} images failed", self.images_failed)?;
        }
        Ok(())
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// A planned unit with its output location.
struct Unit {
    spec: VariantSpec,
    output: PathBuf,
    path: String,
}

/// Catalog store location for a site, `None` when persistence is off.
pub fn catalog_store(config: &SiteConfig, site_root: &Path) -> Option<PathBuf> {
    config
        .catalog
        .persist
        .then(|| site_root.join(&config.catalog.store_file))
}

pub struct Pipeline<T: Transcoder> {
    config: SiteConfig,
    site_root: PathBuf,
    output_root: PathBuf,
    transcoder: T,
    encoding: EncodeOptions,
    catalog: Mutex<Catalog>,
    events: Option<Sender<ProcessEvent>>,
}

impl<T: Transcoder> Pipeline<T> {
    pub fn new(
        config: SiteConfig,
        site_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        transcoder: T,
        catalog: Catalog,
    ) -> Self {
        Self {
            encoding: EncodeOptions::from_codecs(&config.codecs),
            config,
            site_root: site_root.into(),
            output_root: output_root.into(),
            transcoder,
            catalog: Mutex::new(catalog),
            events: None,
        }
    }

    /// Create a pipeline with the catalog loaded from the configured store.
    pub fn open(
        config: SiteConfig,
        site_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        transcoder: T,
    ) -> Result<Self, CatalogError> {
        let site_root = site_root.into();
        let catalog = Catalog::load(catalog_store(&config, &site_root).as_deref())?;
        Ok(Self::new(config, site_root, output_root, transcoder, catalog))
    }

    /// Send a [`ProcessEvent`] for every processed source.
    pub fn with_events(mut self, events: Sender<ProcessEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_catalog(self) -> Catalog {
        self.catalog
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Process one source image.
    ///
    /// With `skip` the source is only copied and its catalog entry is left
    /// as is. The driver decides when a source is unchanged.
    pub fn process(&self, path: &Path, skip: bool) -> Result<ProcessReport, PipelineError> {
        let result = self.run(path, skip);
        if let Some(tx) = &self.events {
            let event = match &result {
                Ok(report) => report.event(),
                Err(e) => ProcessEvent::ImageFailed {
                    source: SourceImage::new(&self.site_root, path)
                        .map(|s| s.relative)
                        .unwrap_or_else(|_| path.display().to_string()),
                    error: e.to_string(),
                },
            };
            tx.send(event).ok();
        }
        result
    }

    /// Process `paths` one after another. Image-level errors are logged and
    /// counted and the run moves on; only a fatal error stops it.
    pub fn process_all(&self, paths: &[PathBuf], skip: bool) -> Result<BuildStats, PipelineError> {
        let mut stats = BuildStats::default();
        for path in paths {
            match self.process(path, skip) {
                Ok(report) => stats.record(&report),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(source = %path.display(), error = %e, "image failed");
                    stats.record_failure();
                }
            }
        }
        Ok(stats)
    }

    fn run(&self, path: &Path, skip: bool) -> Result<ProcessReport, PipelineError> {
        let source = SourceImage::new(&self.site_root, path)?;
        let _span = info_span!("source", path = %source.relative).entered();
        let dry_run = self.config.processing.dry_run;

        let mut report = ProcessReport {
            source: source.relative.clone(),
            skipped: skip,
            dry_run,
            dimensions: None,
            outcomes: Vec::new(),
            entry: None,
            copied_to: self.output_root.join(source.relative.trim_start_matches('/')),
        };

        if skip {
            debug!("unchanged, copy only");
        } else {
            self.generate(&source, &mut report)?;
        }

        self.copy_source(&source, &report.copied_to)?;
        Ok(report)
    }

    /// Identify, plan, transcode, aggregate and persist.
    fn generate(&self, source: &SourceImage, report: &mut ProcessReport) -> Result<(), PipelineError> {
        let dims = get_dimensions(&self.transcoder, &source.absolute).map_err(|e| {
            PipelineError::SourceRead {
                path: source.absolute.clone(),
                reason: e.to_string(),
            }
        })?;
        report.dimensions = Some(dims.as_tuple());
        trace!(width = dims.width, height = dims.height, "read dimensions");

        let plan = plan(dims.as_tuple(), &source.extension, &self.config).map_err(|source_err| {
            PipelineError::Plan {
                path: source.absolute.clone(),
                source: source_err,
            }
        })?;
        let units = self.layout(source, &plan.variants)?;
        info!(variants = units.len(), "transcoding");

        let dry_run = self.config.processing.dry_run;
        let timeout = self.config.processing.variant_timeout();
        let results: Vec<Result<u32, TranscodeError>> = units
            .par_iter()
            .map(|unit| {
                let params = TranscodeParams {
                    source: source.absolute.clone(),
                    output: unit.output.clone(),
                    width: unit.spec.width,
                    format: unit.spec.format,
                    encoding: self.encoding,
                    deadline: timeout.map(|t| Instant::now() + t),
                };
                transcode(&self.transcoder, &params, dry_run)
            })
            .collect();

        let mut entry = CatalogEntry::new();
        for (unit, result) in units.into_iter().zip(results) {
            match &result {
                Ok(height) => {
                    let variant = GeneratedVariant {
                        path: unit.path.clone(),
                        width: unit.spec.width,
                        height: *height,
                        format: unit.spec.format,
                    };
                    if unit.spec.thumbnail {
                        entry.set_thumbnail(variant);
                    } else {
                        entry.add_file(variant);
                    }
                }
                Err(e) => warn!(output = %unit.path, error = %e, "variant not recorded"),
            }
            report.outcomes.push(UnitOutcome {
                spec: unit.spec,
                path: unit.path,
                result,
            });
        }

        if dry_run {
            info!("dry run: catalog entry not saved");
        } else {
            let mut catalog = self.catalog();
            catalog.put(source.relative.clone(), entry.clone());
            catalog.save()?;
            debug!(entries = catalog.len(), "catalog saved");
        }
        report.entry = Some(entry);
        Ok(())
    }

    /// Output paths for every planned variant. Fails before anything is
    /// written if any path repeats the generated directory.
    fn layout(&self, source: &SourceImage, specs: &[VariantSpec]) -> Result<Vec<Unit>, PipelineError> {
        let images = &self.config.images;
        let out_dir = Path::new(&images.output_dir).join(source.relative_dir());

        specs
            .iter()
            .map(|spec| {
                let mask = if spec.thumbnail {
                    &self.config.thumbnails.filename_mask
                } else {
                    &images.filename_mask
                };
                let name = render_mask(mask, &source.stem, spec.width, spec.format.extension());
                let relative = out_dir.join(name);
                if count_components(&relative, &images.generated_dir) > 1 {
                    return Err(PipelineError::PathInvariant {
                        path: relative,
                        token: images.generated_dir.clone(),
                    });
                }
                Ok(Unit {
                    spec: *spec,
                    output: self.site_root.join(&relative),
                    path: slash_path(&relative),
                })
            })
            .collect()
    }

    fn copy_source(&self, source: &SourceImage, dest: &Path) -> Result<(), PipelineError> {
        if self.config.processing.dry_run {
            info!(to = %dest.display(), "dry run: would copy source");
            return Ok(());
        }
        if dest == source.absolute {
            debug!("output root is the site root, nothing to copy");
            return Ok(());
        }
        let copy_err = |e| PipelineError::Copy {
            from: source.absolute.clone(),
            to: dest.to_path_buf(),
            source: e,
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(copy_err)?;
        }
        std::fs::copy(&source.absolute, dest).map_err(copy_err)?;
        debug!(to = %dest.display(), "copied source");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use crate::imaging::backend::tests::MockTranscoder;
    use crate::test_helpers::*;
    use tempfile::TempDir;

    const LADDER: [u32; 3] = [1920, 1024, 480];

    fn test_config() -> SiteConfig {
        let mut config = SiteConfig::default();
        config.images.widths = LADDER.to_vec();
        config
    }

    fn pipeline(
        site: &TempDir,
        out: &TempDir,
        config: SiteConfig,
        backend: MockTranscoder,
    ) -> Pipeline<MockTranscoder> {
        Pipeline::open(config, site.path(), out.path(), backend).unwrap()
    }

    fn store(site: &TempDir) -> PathBuf {
        site.path().join(".generatedImages.json")
    }

    // =========================================================================
    // SourceImage
    // =========================================================================

    #[test]
    fn source_image_normalizes_relative_path() {
        let source =
            SourceImage::new(Path::new("/site"), Path::new("/site/blog/My-Cat.JPG")).unwrap();
        assert_eq!(source.relative, "/blog/My-Cat.JPG");
        assert_eq!(source.stem, "My-Cat");
        assert_eq!(source.extension, "jpg");
        assert_eq!(source.relative_dir(), PathBuf::from("blog"));
    }

    #[test]
    fn source_image_accepts_site_relative_input() {
        let source = SourceImage::new(Path::new("/site"), Path::new("cat.png")).unwrap();
        assert_eq!(source.absolute, PathBuf::from("/site/cat.png"));
        assert_eq!(source.relative, "/cat.png");
        assert_eq!(source.relative_dir(), PathBuf::new());
    }

    #[test]
    fn source_image_outside_root_is_error() {
        let result = SourceImage::new(Path::new("/site"), Path::new("/elsewhere/cat.jpg"));
        assert!(matches!(result, Err(PipelineError::SourceRead { .. })));
    }

    #[test]
    fn source_image_without_extension_is_error() {
        let result = SourceImage::new(Path::new("/site"), Path::new("/site/README"));
        assert!(matches!(result, Err(PipelineError::SourceRead { .. })));
    }

    // =========================================================================
    // Planning through the pipeline
    // =========================================================================

    #[test]
    fn entry_widths_sorted_ascending() {
        let site = setup_site(&[("blog/cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(2000, 1000);
        let p = pipeline(&site, &out, test_config(), backend);

        let report = p.process(&site.path().join("blog/cat.jpg"), false).unwrap();
        assert_eq!(report.written(), 6);

        let catalog = p.catalog();
        let entry = find_entry(&catalog, "/blog/cat.jpg");
        assert_eq!(widths_of(entry, OutputFormat::Webp), vec![480, 1024, 1920]);
        assert_eq!(widths_of(entry, OutputFormat::Jpeg), vec![480, 1024, 1920]);
    }

    #[test]
    fn upscales_are_skipped() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1024, 512);
        let p = pipeline(&site, &out, test_config(), backend);

        p.process(Path::new("cat.jpg"), false).unwrap();
        let catalog = p.catalog();
        assert_eq!(
            widths_of(find_entry(&catalog, "/cat.jpg"), OutputFormat::Webp),
            vec![480, 1024]
        );
    }

    #[test]
    fn small_source_gets_native_width() {
        let site = setup_site(&[("icon.png", 10, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(100, 100);
        let p = pipeline(&site, &out, test_config(), backend);

        p.process(Path::new("icon.png"), false).unwrap();
        let catalog = p.catalog();
        let entry = find_entry(&catalog, "/icon.png");
        assert_eq!(widths_of(entry, OutputFormat::Webp), vec![100]);
        assert_eq!(widths_of(entry, OutputFormat::Png), vec![100]);
        assert_eq!(
            entry.format(OutputFormat::Png).unwrap().files[0].path,
            "assets/_generatedImages/icon-100.png"
        );
    }

    #[test]
    fn stored_height_is_the_transcoder_value() {
        let site = setup_site(&[("wide.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        // 480 * 333 / 1000 = 159.84 → 160
        let backend = MockTranscoder::with_dimensions(1000, 333);
        let p = pipeline(&site, &out, test_config(), backend);

        p.process(Path::new("wide.jpg"), false).unwrap();
        let catalog = p.catalog();
        let files = &find_entry(&catalog, "/wide.jpg")
            .format(OutputFormat::Webp)
            .unwrap()
            .files;
        assert_eq!(files[0].width, 480);
        assert_eq!(files[0].height, 160);
    }

    #[test]
    fn outputs_mirror_source_directories() {
        let site = setup_site(&[("blog/2024/cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(500, 250);
        let p = pipeline(&site, &out, test_config(), backend);

        let report = p.process(Path::new("blog/2024/cat.jpg"), false).unwrap();
        let paths: Vec<&str> = report.outcomes.iter().map(|o| o.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "assets/_generatedImages/blog/2024/cat-480.webp",
                "assets/_generatedImages/blog/2024/cat-480.jpeg",
            ]
        );
        let ops = p.transcoder.get_operations();
        assert!(ops.iter().any(|op| matches!(
            op,
            crate::imaging::backend::tests::RecordedOp::Transcode { output, .. }
                if output.ends_with("assets/_generatedImages/blog/2024/cat-480.webp")
        )));
    }

    // =========================================================================
    // Failure handling
    // =========================================================================

    #[test]
    fn repeated_generated_dir_fails_before_any_write() {
        let site = setup_site(&[("assets/_generatedImages/old/cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, test_config(), backend);

        let err = p
            .process(Path::new("assets/_generatedImages/old/cat.jpg"), false)
            .unwrap_err();
        assert!(matches!(err, PipelineError::PathInvariant { .. }));
        assert!(!err.is_fatal());

        assert!(p.transcoder.transcodes().is_empty());
        assert!(p.catalog().is_empty());
        assert!(!store(&site).exists());
        assert!(
            !site
                .path()
                .join("assets/_generatedImages/assets")
                .exists()
        );
        assert!(!out.path().join("assets").exists());
    }

    #[test]
    fn failed_variant_does_not_stop_siblings() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend =
            MockTranscoder::with_dimensions(2000, 1000).failing_on(480, OutputFormat::Jpeg);
        let mut config = test_config();
        config.thumbnails.enabled = true;
        let p = pipeline(&site, &out, config, backend);

        let report = p.process(Path::new("cat.jpg"), false).unwrap();
        // 3 widths x 2 formats + 2 thumbnails, all attempted
        assert_eq!(p.transcoder.transcodes().len(), 8);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.written(), 7);

        let catalog = p.catalog();
        let entry = find_entry(&catalog, "/cat.jpg");
        assert_eq!(widths_of(entry, OutputFormat::Jpeg), vec![1024, 1920]);
        assert_eq!(widths_of(entry, OutputFormat::Webp), vec![480, 1024, 1920]);
        let thumb = entry.format(OutputFormat::Jpeg).unwrap().thumbnail.as_ref();
        assert_eq!(thumb.unwrap().width, 1280);
        assert_eq!(
            thumb.unwrap().path,
            "assets/_generatedImages/cat-1280-thumbnail.jpeg"
        );
        assert!(out.path().join("cat.jpg").exists());
    }

    #[test]
    fn failed_thumbnail_keeps_regular_variants() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        // 600x300 source: thumbnail fits at 600 wide, regular ladder is [480]
        let backend =
            MockTranscoder::with_dimensions(600, 300).failing_on(600, OutputFormat::Webp);
        let mut config = test_config();
        config.thumbnails.enabled = true;
        let p = pipeline(&site, &out, config, backend);

        p.process(Path::new("cat.jpg"), false).unwrap();
        let catalog = p.catalog();
        let webp = find_entry(&catalog, "/cat.jpg")
            .format(OutputFormat::Webp)
            .unwrap();
        assert_eq!(webp.widths(), vec![480]);
        assert!(webp.thumbnail.is_none());
    }

    #[test]
    fn timed_out_variant_does_not_stop_siblings() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500).slow_on(
            480,
            OutputFormat::Jpeg,
            std::time::Duration::from_millis(1100),
        );
        let mut config = test_config();
        config.processing.variant_timeout_secs = Some(1);
        let p = pipeline(&site, &out, config, backend);

        let report = p.process(Path::new("cat.jpg"), false).unwrap();
        let failures: Vec<&UnitOutcome> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].spec.format, OutputFormat::Jpeg);
        assert!(matches!(failures[0].result, Err(TranscodeError::TimedOut)));

        let catalog = p.catalog();
        let entry = find_entry(&catalog, "/cat.jpg");
        assert_eq!(widths_of(entry, OutputFormat::Webp), vec![480]);
        assert!(widths_of(entry, OutputFormat::Jpeg).is_empty());
    }

    #[test]
    fn unreadable_source_is_source_error() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let p = pipeline(&site, &out, test_config(), MockTranscoder::new());

        let err = p.process(Path::new("cat.jpg"), false).unwrap_err();
        assert!(matches!(err, PipelineError::SourceRead { .. }));
        assert!(!err.is_fatal());
        assert!(!out.path().join("cat.jpg").exists());
    }

    #[test]
    fn unknown_extension_is_plan_error() {
        let site = setup_site(&[]);
        std::fs::write(site.path().join("anim.gif"), b"GIF89a").unwrap();
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(100, 100);
        let p = pipeline(&site, &out, test_config(), backend);

        let err = p.process(Path::new("anim.gif"), false).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Plan {
                source: PlanError::NoFormats { .. },
                ..
            }
        ));
    }

    #[test]
    fn unwritable_store_is_fatal() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let mut config = test_config();
        config.catalog.store_file = "blocker/store.json".to_string();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, config, backend);
        // The store's parent turns into a file after the catalog was loaded
        std::fs::write(site.path().join("blocker"), b"file, not a directory").unwrap();

        let err = p.process(Path::new("cat.jpg"), false).unwrap_err();
        assert!(matches!(err, PipelineError::Persist(_)));
        assert!(err.is_fatal());
    }

    // =========================================================================
    // Skip, dry run, persistence
    // =========================================================================

    #[test]
    fn skip_leaves_entry_untouched_but_copies() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, test_config(), backend);

        p.process(Path::new("cat.jpg"), false).unwrap();
        let before = p.catalog().get("/cat.jpg").cloned().unwrap();
        let ops_before = p.transcoder.get_operations().len();
        std::fs::remove_file(out.path().join("cat.jpg")).unwrap();

        let report = p.process(Path::new("cat.jpg"), true).unwrap();
        assert!(report.skipped);
        assert!(report.outcomes.is_empty());
        assert_eq!(p.transcoder.get_operations().len(), ops_before);
        assert_eq!(p.catalog().get("/cat.jpg"), Some(&before));
        assert!(out.path().join("cat.jpg").exists());
    }

    #[test]
    fn skip_of_untracked_source_stays_untracked() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let p = pipeline(&site, &out, test_config(), MockTranscoder::new());

        p.process(Path::new("cat.jpg"), true).unwrap();
        assert!(p.catalog().lookup("/cat.jpg").is_err());
        assert!(out.path().join("cat.jpg").exists());
    }

    #[test]
    fn dry_run_writes_nothing() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let mut config = test_config();
        config.processing.dry_run = true;
        let p = pipeline(&site, &out, config, backend);

        let report = p.process(Path::new("cat.jpg"), false).unwrap();
        assert!(report.dry_run);
        assert!(p.transcoder.transcodes().is_empty());
        assert!(!store(&site).exists());
        assert!(p.catalog().is_empty());
        assert!(!out.path().join("cat.jpg").exists());

        let entry = report.entry.unwrap();
        let heights: Vec<u32> = entry.variants().map(|v| v.height).collect();
        assert!(heights.iter().all(|&h| h == 0));
    }

    #[test]
    fn catalog_is_saved_after_every_image() {
        let site = setup_site(&[("a.jpg", 20, 10), ("b.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, test_config(), backend);

        p.process(Path::new("a.jpg"), false).unwrap();
        assert_eq!(Catalog::load(Some(&store(&site))).unwrap().len(), 1);
        p.process(Path::new("b.jpg"), false).unwrap();
        assert_eq!(Catalog::load(Some(&store(&site))).unwrap().len(), 2);
    }

    #[test]
    fn reprocessing_replaces_entry() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let p = pipeline(
            &site,
            &out,
            test_config(),
            MockTranscoder::with_dimensions(2000, 1000),
        );
        p.process(Path::new("cat.jpg"), false).unwrap();
        let catalog = p.into_catalog();

        let p = Pipeline::new(
            test_config(),
            site.path(),
            out.path(),
            MockTranscoder::with_dimensions(600, 300),
            catalog,
        );
        p.process(Path::new("cat.jpg"), false).unwrap();
        let catalog = p.catalog();
        assert_eq!(
            widths_of(find_entry(&catalog, "/cat.jpg"), OutputFormat::Webp),
            vec![480]
        );
    }

    #[test]
    fn parallel_sources_share_one_catalog() {
        let names = ["a.jpg", "b.jpg", "c.jpg", "d.jpg", "e.jpg"];
        let sources: Vec<(&str, u32, u32)> = names.iter().map(|n| (*n, 20, 10)).collect();
        let site = setup_site(&sources);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, test_config(), backend);

        let results: Vec<_> = names
            .par_iter()
            .map(|n| p.process(Path::new(n), false))
            .collect();
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(p.catalog().len(), 5);
        assert_eq!(Catalog::load(Some(&store(&site))).unwrap().len(), 5);
    }

    #[test]
    fn copy_onto_itself_is_skipped() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let before = std::fs::read(site.path().join("cat.jpg")).unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = Pipeline::open(test_config(), site.path(), site.path(), backend).unwrap();

        p.process(Path::new("cat.jpg"), false).unwrap();
        assert_eq!(std::fs::read(site.path().join("cat.jpg")).unwrap(), before);
    }

    #[test]
    fn in_memory_catalog_never_touches_disk() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let mut config = test_config();
        config.catalog.persist = false;
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, config, backend);

        p.process(Path::new("cat.jpg"), false).unwrap();
        assert_eq!(p.catalog().len(), 1);
        assert!(!store(&site).exists());
    }

    // =========================================================================
    // Events and stats
    // =========================================================================

    #[test]
    fn events_describe_each_source() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend =
            MockTranscoder::with_dimensions(1000, 500).failing_on(480, OutputFormat::Jpeg);
        let (tx, rx) = std::sync::mpsc::channel();
        let p = pipeline(&site, &out, test_config(), backend).with_events(tx);

        p.process(Path::new("cat.jpg"), false).unwrap();
        p.process(Path::new("cat.jpg"), true).unwrap();
        p.process(Path::new("missing.gif"), false).unwrap_err();
        drop(p);

        let events: Vec<ProcessEvent> = rx.iter().collect();
        assert_eq!(events.len(), 3);
        match &events[0] {
            ProcessEvent::ImageProcessed {
                source,
                dimensions,
                variants,
            } => {
                assert_eq!(source, "/cat.jpg");
                assert_eq!(*dimensions, (1000, 500));
                assert_eq!(variants[0].label, "480px webp");
                assert_eq!(variants[0].status, VariantStatus::Written);
                assert!(matches!(variants[1].status, VariantStatus::Failed(_)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            events[1],
            ProcessEvent::ImageSkipped {
                source: "/cat.jpg".to_string()
            }
        );
        assert!(matches!(
            &events[2],
            ProcessEvent::ImageFailed { source, .. } if source == "/missing.gif"
        ));
    }

    #[test]
    fn build_stats_count_outcomes() {
        let site = setup_site(&[("cat.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend =
            MockTranscoder::with_dimensions(1000, 500).failing_on(480, OutputFormat::Jpeg);
        let p = pipeline(&site, &out, test_config(), backend);

        let mut stats = BuildStats::default();
        stats.record(&p.process(Path::new("cat.jpg"), false).unwrap());
        stats.record(&p.process(Path::new("cat.jpg"), true).unwrap());
        stats.record_failure();

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.variants_written, 1);
        assert_eq!(stats.variants_failed, 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(
            stats.to_string(),
            "1 processed, 1 unchanged (1 variants written, 1 failed), 1 images failed"
        );
    }

    #[test]
    fn process_all_continues_past_bad_paths() {
        let site = setup_site(&[("a.jpg", 20, 10), ("c.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let (tx, rx) = std::sync::mpsc::channel();
        let p = pipeline(&site, &out, test_config(), backend).with_events(tx);
        let stray = out.path().join("stray.jpg");

        let paths = vec![PathBuf::from("a.jpg"), stray.clone(), PathBuf::from("c.jpg")];
        let stats = p.process_all(&paths, false).unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.images_failed, 1);
        assert_eq!(
            p.catalog().iter().map(|(k, _)| k.to_string()).collect::<Vec<_>>(),
            vec!["/a.jpg", "/c.jpg"]
        );
        drop(p);

        let failed: Vec<ProcessEvent> = rx
            .iter()
            .filter(|e| matches!(e, ProcessEvent::ImageFailed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        match &failed[0] {
            ProcessEvent::ImageFailed { source, error } => {
                assert_eq!(source, &stray.display().to_string());
                assert!(error.contains("stray.jpg"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn process_all_stops_on_fatal_error() {
        let site = setup_site(&[("a.jpg", 20, 10), ("b.jpg", 20, 10)]);
        let out = TempDir::new().unwrap();
        let mut config = test_config();
        config.catalog.store_file = "blocker/store.json".to_string();
        let backend = MockTranscoder::with_dimensions(1000, 500);
        let p = pipeline(&site, &out, config, backend);
        std::fs::write(site.path().join("blocker"), b"file, not a directory").unwrap();

        let paths = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
        let err = p.process_all(&paths, false).unwrap_err();
        assert!(err.is_fatal());
        assert!(!out.path().join("b.jpg").exists());
    }

    #[test]
    fn build_stats_display_without_failures() {
        let stats = BuildStats {
            processed: 4,
            unchanged: 2,
            variants_written: 16,
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "4 processed, 2 unchanged (16 variants written)");
    }
}
