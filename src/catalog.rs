//! Variant catalog: which files were generated for which source.
//!
//! The catalog maps a source's site-relative path (`/blog/cat.jpg`) to a
//! [`CatalogEntry`]: per output format, the width-sorted list of generated
//! files plus an optional thumbnail. Templates read it through
//! [`Catalog::lookup`] to build `srcset` attributes.
//!
//! ## Storage
//!
//! The store is a JSON array of `[sourcePath, entry]` pairs in the site
//! root (`.generatedImages.json` by default):
//!
//! ```json
//! [
//!   ["/blog/cat.jpg", {
//!     "webp": {
//!       "files": [
//!         { "path": "assets/_generatedImages/blog/cat-480.webp", "width": 480, "height": 240, "format": "webp" }
//!       ]
//!     }
//!   }]
//! ]
//! ```
//!
//! Every save writes the whole catalog to a sibling temp file and renames it
//! over the store, so a crash leaves either the old or the new catalog and
//! never a torn one. Keys and formats are ordered maps and file lists are
//! kept sorted by width, so saving an unchanged catalog reproduces the
//! store byte for byte.

use crate::format::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error on catalog store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("catalog store {path} is not valid: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot serialize catalog for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("image {0} is not in the catalog (never processed, or skipped)")]
    NotTracked(String),
}

/// One generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedVariant {
    /// Output path relative to the site root, `/`-separated, no leading slash.
    pub path: String,
    pub width: u32,
    /// Height reported by the transcoder. 0 for dry-run builds.
    pub height: u32,
    pub format: OutputFormat,
}

impl GeneratedVariant {
    /// Root-relative URL, e.g. `/assets/_generatedImages/cat-480.webp`.
    pub fn url(&self) -> String {
        format!("/{}", self.path)
    }

    /// Filesystem location under `site_root`.
    pub fn absolute(&self, site_root: &Path) -> PathBuf {
        site_root.join(&self.path)
    }
}

/// Variants of one output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVariants {
    /// Sorted ascending by width, one file per width.
    pub files: Vec<GeneratedVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<GeneratedVariant>,
}

impl FormatVariants {
    pub fn widths(&self) -> Vec<u32> {
        self.files.iter().map(|f| f.width).collect()
    }

    /// Largest file, the natural `src` fallback.
    pub fn largest(&self) -> Option<&GeneratedVariant> {
        self.files.last()
    }

    fn normalize(&mut self) {
        self.files.sort_by_key(|f| f.width);
        self.files.dedup_by_key(|f| f.width);
    }
}

/// Everything generated for one source, keyed by output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CatalogEntry {
    formats: BTreeMap<OutputFormat, FormatVariants>,
}

impl CatalogEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a regular variant. The file list is re-sorted by width; a file
    /// with a width already present replaces the old one.
    pub fn add_file(&mut self, variant: GeneratedVariant) {
        let slot = self.formats.entry(variant.format).or_default();
        slot.files.retain(|f| f.width != variant.width);
        slot.files.push(variant);
        slot.normalize();
    }

    /// Set the thumbnail of the variant's format, replacing any previous one.
    pub fn set_thumbnail(&mut self, variant: GeneratedVariant) {
        let format = variant.format;
        self.formats.entry(format).or_default().thumbnail = Some(variant);
    }

    pub fn format(&self, format: OutputFormat) -> Option<&FormatVariants> {
        self.formats.get(&format)
    }

    /// Formats with at least one file or a thumbnail.
    pub fn formats(&self) -> impl Iterator<Item = (OutputFormat, &FormatVariants)> {
        self.formats.iter().map(|(f, v)| (*f, v))
    }

    /// Every generated file, thumbnails included.
    pub fn variants(&self) -> impl Iterator<Item = &GeneratedVariant> {
        self.formats
            .values()
            .flat_map(|v| v.files.iter().chain(v.thumbnail.iter()))
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    fn normalize(&mut self) {
        self.formats.values_mut().for_each(FormatVariants::normalize);
    }
}

/// In-memory catalog with an optional backing store.
#[derive(Debug, Default)]
pub struct Catalog {
    store: Option<PathBuf>,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// A catalog that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `store`. Empty when no store is given or the file does not
    /// exist yet. A store that exists but cannot be parsed is an error: it is
    /// the record of every generated file and is never silently dropped.
    pub fn load(store: Option<&Path>) -> Result<Self, CatalogError> {
        let Some(path) = store else {
            return Ok(Self::in_memory());
        };
        let mut catalog = Self {
            store: Some(path.to_path_buf()),
            entries: BTreeMap::new(),
        };
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(catalog),
            Err(source) => {
                return Err(CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let pairs: Vec<(String, CatalogEntry)> =
            serde_json::from_str(&content).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for (key, mut entry) in pairs {
            entry.normalize();
            catalog.entries.insert(key, entry);
        }
        Ok(catalog)
    }

    /// Write the whole catalog to its store. No-op for in-memory catalogs.
    pub fn save(&self) -> Result<(), CatalogError> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let io_err = |source| CatalogError::Io {
            path: path.clone(),
            source,
        };

        let pairs: Vec<(&String, &CatalogEntry)> = self.entries.iter().collect();
        let json = serde_json::to_string_pretty(&pairs).map_err(|source| CatalogError::Serialize {
            path: path.clone(),
            source,
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    pub fn get(&self, source: &str) -> Option<&CatalogEntry> {
        self.entries.get(source)
    }

    /// Replace the entry for `source`. Returns the previous entry.
    pub fn put(&mut self, source: impl Into<String>, mut entry: CatalogEntry) -> Option<CatalogEntry> {
        entry.normalize();
        self.entries.insert(source.into(), entry)
    }

    /// Read contract for templates: a missing source is an error.
    pub fn lookup(&self, source: &str) -> Result<&CatalogEntry, CatalogError> {
        self.get(source)
            .ok_or_else(|| CatalogError::NotTracked(source.to_string()))
    }

    pub fn remove(&mut self, source: &str) -> Option<CatalogEntry> {
        self.entries.remove(source)
    }

    /// Drop every entry whose source is not in `sources`. Returns the
    /// removed keys, sorted.
    pub fn prune(&mut self, sources: &[String]) -> Vec<String> {
        let orphaned: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !sources.contains(key))
            .cloned()
            .collect();
        for key in &orphaned {
            self.remove(key);
        }
        orphaned
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Compare the catalog with the sources found on disk and the files
    /// each entry lists. Sorted by source path.
    pub fn audit(&self, site_root: &Path, sources: &[String]) -> Vec<(String, AuditStatus)> {
        let mut report: Vec<(String, AuditStatus)> = sources
            .iter()
            .map(|source| {
                let status = match self.get(source) {
                    None => AuditStatus::Untracked,
                    Some(entry) => {
                        let missing: Vec<String> = entry
                            .variants()
                            .filter(|v| !v.absolute(site_root).exists())
                            .map(|v| v.path.clone())
                            .collect();
                        if missing.is_empty() {
                            AuditStatus::Complete {
                                files: entry.variants().count(),
                            }
                        } else {
                            AuditStatus::MissingFiles(missing)
                        }
                    }
                };
                (source.clone(), status)
            })
            .collect();

        report.extend(
            self.entries
                .keys()
                .filter(|key| !sources.contains(key))
                .map(|key| (key.clone(), AuditStatus::Orphaned)),
        );
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }
}

/// State of one source as seen by [`Catalog::audit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    /// Tracked and every listed file exists.
    Complete { files: usize },
    /// Tracked, but these files are gone.
    MissingFiles(Vec<String>),
    /// On disk, never processed.
    Untracked,
    /// In the catalog, no longer on disk.
    Orphaned,
}
