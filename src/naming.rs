//! Generated filename convention.
//!
//! Variant files are named by substituting three placeholders into a mask:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{fn}` | source filename without extension |
//! | `{width}` | pixel width of the variant |
//! | `{ext}` | output format extension |
//!
//! With the stock masks `photo.jpg` becomes `photo-480.webp` and, for the
//! thumbnail, `photo-1280-thumbnail.webp`.
//!
//! Templates read the width back out of a filename with [`parse_width`]:
//! split on `-`, take the last token, strip the extension, parse the number.
//! The naming convention is therefore a wire format between the build and
//! whatever renders `srcset` attributes; changing the mask means changing
//! the parser too.

/// Fill a filename mask.
///
/// ```text
/// render_mask("{fn}-{width}.{ext}", "photo", 480, "webp") → "photo-480.webp"
/// ```
pub fn render_mask(mask: &str, stem: &str, width: u32, ext: &str) -> String {
    mask.replace("{fn}", stem)
        .replace("{width}", &width.to_string())
        .replace("{ext}", ext)
}

/// Recover the width from a variant filename or URL.
///
/// Handles:
/// - `"photo-480.webp"` → `Some(480)`
/// - `"/blog/my-cat-1024.jpeg"` → `Some(1024)` (dashes in the stem are fine)
/// - `"photo.webp"` → `None` (no dash)
/// - `"photo-large.webp"` → `None` (token not numeric)
///
/// Thumbnail names (`photo-1280-thumbnail.webp`) do not parse: their last
/// token is `thumbnail`. Thumbnails are looked up through the catalog's
/// dedicated field, never through `srcset` parsing.
pub fn parse_width(name: &str) -> Option<u32> {
    let last = name.rsplit('-').next()?;
    if last.len() == name.len() {
        return None;
    }
    let number = last.split('.').next()?;
    number.parse().ok()
}
