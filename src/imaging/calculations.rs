//! Pure calculation functions for variant dimensions.
//!
//! All functions here are pure and testable without any I/O or images.

/// Select the widths to render from a candidate list.
///
/// A candidate qualifies when it does not exceed the source width, or when
/// upscaling is allowed. Duplicates are dropped, first occurrence wins, and
/// candidate order is otherwise kept. If nothing qualifies the source width
/// itself is returned, so every format always yields one variant.
///
/// # Examples
/// ```
/// # use imgset::imaging::plan_widths;
/// assert_eq!(plan_widths(1000, &[1920, 1024, 480], false), vec![480]);
/// assert_eq!(plan_widths(100, &[1920, 1024, 480], false), vec![100]);
/// ```
pub fn plan_widths(source_width: u32, candidates: &[u32], allow_upscale: bool) -> Vec<u32> {
    let mut widths: Vec<u32> = Vec::with_capacity(candidates.len());
    for &width in candidates {
        if (allow_upscale || source_width >= width) && !widths.contains(&width) {
            widths.push(width);
        }
    }
    if widths.is_empty() {
        widths.push(source_width);
    }
    widths
}

/// Fit `source` into the `max` box preserving its aspect ratio.
///
/// The source is scaled by `min(max_w / src_w, max_h / src_h)`, then each
/// axis is clamped to the box. Without `allow_upscale` the result is also
/// clamped to the source's own size. Values are rounded to the nearest
/// pixel, never below 1.
///
/// The fit is idempotent: fitting its own output into the same box returns
/// the same box.
///
/// # Arguments
/// * `source` - Source dimensions (width, height), both non-zero
/// * `max` - Bounding box (width, height), both non-zero
/// * `allow_upscale` - Whether the result may exceed the source
pub fn aspect_fit(source: (u32, u32), max: (u32, u32), allow_upscale: bool) -> (u32, u32) {
    let (src_w, src_h) = (source.0 as f64, source.1 as f64);
    let (max_w, max_h) = (max.0 as f64, max.1 as f64);
    let aspect = src_w / src_h;

    let scale = (max_w / src_w).min(max_h / src_h);
    let mut width = src_w * scale;
    let mut height = src_h * scale;

    if width > max_w {
        width = max_w;
        height = width / aspect;
    }
    if height > max_h {
        height = max_h;
        width = height * aspect;
    }

    if !allow_upscale {
        if width > src_w {
            width = src_w;
            height = width / aspect;
        }
        if height > src_h {
            height = src_h;
            width = height * aspect;
        }
    }

    (round_px(width), round_px(height))
}

fn round_px(value: f64) -> u32 {
    value.round().max(1.0) as u32
}
