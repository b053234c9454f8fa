//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every line leads with the source as the site sees it (`/blog/cat.jpg`),
//! with per-variant status as indented context lines. Generated paths are
//! left to the catalog and `imgset lookup`.
//!
//! # Output Format
//!
//! ## Build / Process
//!
//! ```text
//! /blog/cat.jpg (2000x1000)
//!     1920px webp: written
//!     480px jpeg: failed (variant exceeded its deadline)
//!     thumbnail webp: written
//! /blog/dog.jpg: unchanged
//! /blog/anim.gif: failed (cannot plan variants for ...)
//! ```
//!
//! ## Check
//!
//! ```text
//! /blog/cat.jpg: 8 files
//! /blog/dog.jpg: 1 missing
//!     assets/_generatedImages/blog/dog-480.webp
//! /blog/new.jpg: untracked
//! /old.jpg: orphaned (source removed)
//! ```
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and, where the CLI needs one, a `print_*` wrapper that writes
//! to stdout. Format functions are pure: no I/O, no side effects.

use crate::catalog::AuditStatus;
use crate::pipeline::{ProcessEvent, VariantStatus};

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

// ============================================================================
// Build / process output
// ============================================================================

/// Format a single process progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::ImageProcessed {
            source,
            dimensions,
            variants,
        } => {
            let mut lines = vec![format!("{} ({}x{})", source, dimensions.0, dimensions.1)];
            for variant in variants {
                let status = match &variant.status {
                    VariantStatus::Written => "written".to_string(),
                    VariantStatus::DryRun => "dry run".to_string(),
                    VariantStatus::Failed(reason) => format!("failed ({reason})"),
                };
                lines.push(format!("{}{}: {}", indent(1), variant.label, status));
            }
            lines
        }
        ProcessEvent::ImageSkipped { source } => vec![format!("{source}: unchanged")],
        ProcessEvent::ImageFailed { source, error } => vec![format!("{source}: failed ({error})")],
    }
}

// ============================================================================
// Check output
// ============================================================================

/// Format the result of [`Catalog::audit`](crate::catalog::Catalog::audit).
pub fn format_audit(report: &[(String, AuditStatus)]) -> Vec<String> {
    let mut lines = Vec::new();
    for (source, status) in report {
        match status {
            AuditStatus::Complete { files } => {
                let noun = if *files == 1 { "file" } else { "files" };
                lines.push(format!("{source}: {files} {noun}"));
            }
            AuditStatus::MissingFiles(missing) => {
                lines.push(format!("{source}: {} missing", missing.len()));
                for path in missing {
                    lines.push(format!("{}{}", indent(1), path));
                }
            }
            AuditStatus::Untracked => lines.push(format!("{source}: untracked")),
            AuditStatus::Orphaned => lines.push(format!("{source}: orphaned (source removed)")),
        }
    }
    lines
}

/// Whether an audit found anything a build would fix.
pub fn audit_is_clean(report: &[(String, AuditStatus)]) -> bool {
    report
        .iter()
        .all(|(_, status)| matches!(status, AuditStatus::Complete { .. }))
}

/// Print audit output to stdout.
pub fn print_audit(report: &[(String, AuditStatus)]) {
    for line in format_audit(report) {
        println!("{}", line);
    }
}
