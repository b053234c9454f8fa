//! # imgset
//!
//! Responsive image variants for static sites. Every tracked source image is
//! resized to a ladder of widths, re-encoded to the formats configured for
//! its extension, and recorded in a catalog that templates query to build
//! `srcset` attributes.
//!
//! # Architecture: Two Stages and a Catalog
//!
//! ```text
//! 1. Scan      site/            →  source list        (tracked extensions only)
//! 2. Process   source           →  variants + copy    (per source, parallel per variant)
//!              variants         →  catalog            (saved after every source)
//! ```
//!
//! The pipeline only ever sees one source at a time and never decides whether
//! a source changed. The CLI driver owns that decision through
//! [`fingerprint`], so the pipeline stays testable against a mock
//! transcoder with no knowledge of previous builds.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Stage 1: walks the site root and collects tracked sources |
//! | [`plan`] | Which widths and formats a source gets, thumbnails included |
//! | [`pipeline`] | Stage 2: identify, plan, transcode, record, copy |
//! | [`catalog`] | Source → variants map, persisted as JSON, queried by templates |
//! | [`imaging`] | The [`imaging::Transcoder`] seam and its `image`-crate backend |
//! | [`fingerprint`] | Content hashes that let a build skip unchanged sources |
//! | [`config`] | `imgset.toml` loading, stock defaults, validation, CLI overrides |
//! | [`format`] | Output formats with their extensions and MIME types |
//! | [`naming`] | Filename mask rendering (`{fn}-{width}.{ext}`) |
//! | [`output`] | CLI output formatting for progress and audits |
//!
//! # Design Decisions
//!
//! ## Never Upscale by Default
//!
//! A width is only generated when the source is at least that wide. A source
//! narrower than every ladder width still gets one variant at its native
//! width, so every tracked image has at least one entry per format.
//!
//! ## One Failure, One Variant
//!
//! Each (width, format) pair is an independent unit. A codec error or a blown
//! deadline removes that variant from the catalog and nothing else. Only a
//! catalog that cannot be saved stops the build, because every later entry
//! would be lost with it.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, Lanczos3 resampling, and encoding all go through the `image`
//! crate (AVIF via rav1e). No ImageMagick or libvips on the build machine.
//!
//! ## Deterministic Catalog
//!
//! Entries are keyed by the site-relative source path and stored in sorted
//! maps with variants sorted by width, so saving the same catalog twice
//! produces identical bytes and the store diffs cleanly in version control.

pub mod catalog;
pub mod config;
pub mod fingerprint;
pub mod format;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod scan;

#[cfg(test)]
pub(crate) mod test_helpers;
