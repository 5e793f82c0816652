//! Media files and their previews.
//!
//! This module provides:
//! - `MediaKind` - Classification by extension
//! - `MediaFile` - Path handle with star marker, digest and view state
//! - `preview` - Memoized decoding and rendering

pub mod archive;
pub mod epub;
pub mod file;
pub mod kind;
pub mod preview;

use std::path::Path;

pub use file::{Dimensions, FileSize, MediaError, MediaFile, Timestamp};
pub use kind::MediaKind;

/// Drop every memoized value derived from `path`.
pub fn forget_path(path: &Path) {
    file::forget_digests(path);
    preview::forget_previews(path);
}
