//! Source discovery.
//!
//! Stage 1 of a build: walk the site root and collect every file whose
//! extension has configured output formats (aliases included).
//!
//! ## Skipped entries
//!
//! - Hidden files and directories (leading `.`), which covers the catalog
//!   and fingerprint stores
//! - Any directory named like `images.generated_dir`, so generated variants
//!   are never fed back in as sources
//! - Directories passed in `exclude`, typically the output root when it
//!   lives inside the site
//!
//! Results are sorted so builds process sources in a stable order.

use crate::config::SiteConfig;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};
use walkdir::{DirEntry, WalkDir};

pub fn find_sources(site_root: &Path, config: &SiteConfig, exclude: &[PathBuf]) -> Vec<PathBuf> {
    let generated_dir = config.images.generated_dir.as_str();
    let keep = |entry: &DirEntry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        if entry.file_type().is_dir()
            && (name == generated_dir || exclude.iter().any(|e| e == entry.path()))
        {
            trace!(dir = %entry.path().display(), "skipping directory");
            return false;
        }
        true
    };

    let mut sources: Vec<PathBuf> = WalkDir::new(site_root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(keep)
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!(error = %err, "cannot read directory entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_source(e.path(), config))
        .map(DirEntry::into_path)
        .collect();
    sources.sort();
    sources
}

fn is_source(path: &Path, config: &SiteConfig) -> bool {
    path.extension()
        .map(|e| config.images.is_tracked(&e.to_string_lossy()))
        .unwrap_or(false)
}
