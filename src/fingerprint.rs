//! Source fingerprints for incremental builds.
//!
//! Encoding every variant of every image on each build is the bottleneck
//! (AVIF through rav1e especially). The pipeline itself never decides
//! whether a source is unchanged; the driver does, with this module, and
//! passes `skip = true` for sources whose fingerprint matches.
//!
//! ## Keys
//!
//! - **source hash**: SHA-256 of the file contents. Content-based rather than
//!   mtime-based so it survives `git checkout`, which resets modification
//!   times.
//! - **config hash**: SHA-256 of every setting that shapes the variants
//!   (`images`, `thumbnails`, `codecs`). When it changes the whole file is
//!   discarded and every source is processed again.
//!
//! ## Storage
//!
//! JSON next to the catalog (`.generatedImages.sources.json` by default). A
//! missing, corrupt, or outdated file simply means "nothing is known to be
//! unchanged"; unlike the catalog it is only an optimization.

use crate::config::SiteConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;

/// Version of the fingerprint file format. Bump this to invalidate all
/// existing files when the format or key computation changes.
const FINGERPRINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub version: u32,
    pub config_hash: String,
    /// Source relative path → SHA-256 of its contents.
    pub sources: BTreeMap<String, String>,
}

impl Fingerprints {
    /// No known sources (first build or `--force`).
    pub fn empty(config_hash: impl Into<String>) -> Self {
        Self {
            version: FINGERPRINT_VERSION,
            config_hash: config_hash.into(),
            sources: BTreeMap::new(),
        }
    }

    /// Load from `path`. Returns an empty set if the file doesn't exist,
    /// can't be parsed, or was written for a different version or config.
    pub fn load(path: &Path, config_hash: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::empty(config_hash),
        };
        let loaded: Self = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(_) => return Self::empty(config_hash),
        };
        if loaded.version != FINGERPRINT_VERSION || loaded.config_hash != config_hash {
            return Self::empty(config_hash);
        }
        loaded
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Whether `source` was last processed with exactly this content.
    pub fn is_unchanged(&self, source: &str, hash: &str) -> bool {
        self.sources.get(source).is_some_and(|h| h == hash)
    }

    pub fn record(&mut self, source: impl Into<String>, hash: impl Into<String>) {
        self.sources.insert(source.into(), hash.into());
    }

    /// Drop a source so the next build processes it again.
    pub fn forget(&mut self, source: &str) {
        self.sources.remove(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

/// SHA-256 of the settings that determine which files a source produces
/// and how they are encoded.
pub fn hash_config(config: &SiteConfig) -> String {
    let mut hasher = Sha256::new();
    for section in [
        serde_json::to_string(&config.images),
        serde_json::to_string(&config.thumbnails),
        serde_json::to_string(&config.codecs),
    ] {
        // Plain structs and maps with string keys always serialize
        hasher.update(section.unwrap_or_default().as_bytes());
        hasher.update(b"\0");
    }
    format!("{:x}", hasher.finalize())
}
