//! Decoded previews and on-demand rendering.
//!
//! Base previews are memoized per media kind (10 entries each, keyed by
//! path). Rendering applies the file's view state (scale, flips, rotation)
//! to a cached base image.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use image::codecs::gif::GifDecoder;
use image::imageops::FilterType;
use image::{AnimationDecoder, DynamicImage, GenericImageView, ImageFormat, RgbImage};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use super::file::{Dimensions, MediaFile};
use super::kind::MediaKind;
use super::{archive, epub};
use crate::cache::{Cache, CacheStats, Invalidate};

/// Previews kept in memory for each media kind.
const PREVIEW_CACHE_LIMIT: usize = 10;

/// Dimensions kept in memory.
const DIMENSIONS_CACHE_LIMIT: usize = 1024;

type Preview = Arc<DynamicImage>;

static IMAGE_PREVIEWS: Lazy<Cache<Preview>> =
    Lazy::new(|| Cache::new("image-previews", Some(PREVIEW_CACHE_LIMIT)));
static GIF_PREVIEWS: Lazy<Cache<Preview>> =
    Lazy::new(|| Cache::new("gif-previews", Some(PREVIEW_CACHE_LIMIT)));
static EPUB_PREVIEWS: Lazy<Cache<Preview>> =
    Lazy::new(|| Cache::new("epub-previews", Some(PREVIEW_CACHE_LIMIT)));
static ARCHIVE_PREVIEWS: Lazy<Cache<Preview>> =
    Lazy::new(|| Cache::new("archive-previews", Some(PREVIEW_CACHE_LIMIT)));
static DIMENSIONS: Lazy<Cache<Dimensions>> =
    Lazy::new(|| Cache::new("dimensions", Some(DIMENSIONS_CACHE_LIMIT)));

static PLACEHOLDER: Lazy<Preview> =
    Lazy::new(|| Arc::new(DynamicImage::ImageRgb8(RgbImage::new(1, 1))));

fn cache_for(kind: MediaKind) -> Option<&'static Cache<Preview>> {
    match kind {
        MediaKind::Image => Some(&*IMAGE_PREVIEWS),
        MediaKind::Gif => Some(&*GIF_PREVIEWS),
        MediaKind::Epub => Some(&*EPUB_PREVIEWS),
        MediaKind::Archive => Some(&*ARCHIVE_PREVIEWS),
        // Frames and pages need external tools
        MediaKind::Video | MediaKind::Pdf => None,
    }
}

/// Counters of the preview cache used for `kind`, if it has one.
pub fn cache_stats(kind: MediaKind) -> Option<CacheStats> {
    cache_for(kind).map(Cache::stats)
}

/// 1x1 black image shown when a file cannot be previewed.
pub fn placeholder() -> Preview {
    PLACEHOLDER.clone()
}

/// Base preview of a file, decoded once and memoized.
///
/// Never fails: undecodable files log a warning and yield the placeholder.
pub fn preview(file: &MediaFile) -> Preview {
    let Some(cache) = cache_for(file.kind()) else {
        debug!(path = ?file.path(), kind = %file.kind(), "No in-process preview for kind");
        return placeholder();
    };

    let key = cache.key(file.path().display(), "preview");
    match cache.get_or_try_insert_with(key, || decode(file).map(Arc::new)) {
        Ok(preview) => preview,
        Err(err) => {
            warn!(path = ?file.path(), error = %err, "Unable to preview file");
            placeholder()
        }
    }
}

fn decode(file: &MediaFile) -> Result<DynamicImage> {
    match file.kind() {
        MediaKind::Image | MediaKind::Gif => open_image(file.path()),
        MediaKind::Epub => epub::cover(file.path()),
        MediaKind::Archive => archive::first_image(file.path()),
        kind => Err(anyhow!("{} files have no in-process preview", kind)),
    }
}

/// Decode an image file; animated GIFs yield their first frame.
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    let format = image::guess_format(&bytes).ok();

    if format == Some(ImageFormat::Gif) {
        let decoder = GifDecoder::new(Cursor::new(bytes))
            .with_context(|| format!("Failed to decode GIF: {:?}", path))?;
        let frame = decoder
            .into_frames()
            .next()
            .ok_or_else(|| anyhow!("GIF has no frames: {:?}", path))?
            .context("Failed to decode GIF frame")?;
        return Ok(DynamicImage::ImageRgba8(frame.into_buffer()));
    }

    match format {
        Some(fmt) => image::load_from_memory_with_format(&bytes, fmt),
        None => image::load_from_memory(&bytes),
    }
    .with_context(|| format!("Failed to decode image: {:?}", path))
}

/// Pixel dimensions of the file's preview.
pub fn dimensions(file: &MediaFile) -> Dimensions {
    let key = DIMENSIONS.key(file.path().display(), "dimensions");
    DIMENSIONS.get_or_insert_with(key, || {
        let (width, height) = preview(file).dimensions();
        Dimensions::new(width, height)
    })
}

/// Render the file at `width`x`height` with its flips and rotation applied.
///
/// Flips are applied to the scaled image before rotating, so the requested
/// size is the pre-rotation size.
pub fn render(file: &MediaFile, width: u32, height: u32) -> DynamicImage {
    let base = preview(file);
    let scaled = base.resize_exact(width.max(1), height.max(1), FilterType::Triangle);

    let flipped = if file.flipped_horizontally() {
        scaled.fliph()
    } else {
        scaled
    };
    let flipped = if file.flipped_vertically() {
        flipped.flipv()
    } else {
        flipped
    };

    match file.rotation() {
        90 => flipped.rotate90(),
        180 => flipped.rotate180(),
        270 => flipped.rotate270(),
        _ => flipped,
    }
}

/// Largest size fitting in `max_width`x`max_height` that keeps the aspect
/// ratio of `source`.
pub fn fit_dimensions(source: Dimensions, max_width: f64, max_height: f64) -> (u32, u32) {
    if source.width == 0 || source.height == 0 {
        return (1, 1);
    }

    let ratio = (max_width / source.width as f64).min(max_height / source.height as f64);
    let width = (source.width as f64 * ratio).round().max(1.0) as u32;
    let height = (source.height as f64 * ratio).round().max(1.0) as u32;
    (width, height)
}

pub(super) fn forget_previews(path: &Path) {
    let part = path.display().to_string();
    for cache in [&IMAGE_PREVIEWS, &GIF_PREVIEWS, &EPUB_PREVIEWS, &ARCHIVE_PREVIEWS] {
        cache.invalidate(&part);
    }
    DIMENSIONS.invalidate(&part);
}
