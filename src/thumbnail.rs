//! Thumbnails for files and directories.
//!
//! File thumbnails are scaled to roughly 256px height while preserving the
//! aspect ratio. Directory thumbnails draw a folder tile with the newest file
//! of the directory embedded in it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::media::file::absolute_dir;
use crate::media::{preview, Dimensions, MediaFile};
use crate::scanner::{FileScanner, SCANNER_CACHE};

/// Default target height for thumbnails in pixels.
pub const DEFAULT_THUMB_HEIGHT: u32 = 256;

/// Width bounds for file thumbnails; the height follows the source ratio
/// once the width hits a bound.
const MIN_THUMB_WIDTH: u32 = 64;
const MAX_THUMB_WIDTH: u32 = 1024;

/// JPEG quality for saved images (0-100).
const JPEG_QUALITY: u8 = 85;

/// Directory thumbnails kept in memory.
const DIR_THUMB_CACHE_LIMIT: usize = 64;

const FOLDER_BACK: Rgba<u8> = Rgba([0xc8, 0x93, 0x2e, 0xff]);
const FOLDER_FRONT: Rgba<u8> = Rgba([0xe8, 0xb9, 0x4a, 0xff]);

/// Directory thumbnails, dropped whenever the directory listing is.
static DIR_THUMB_CACHE: Lazy<Arc<Cache<Arc<RgbaImage>>>> = Lazy::new(|| {
    Cache::shared("dir-thumbnails", Some(DIR_THUMB_CACHE_LIMIT)).chained_to(&SCANNER_CACHE)
});

/// Thumbnail generator for single files.
pub struct ThumbnailGenerator;

impl ThumbnailGenerator {
    /// Write a thumbnail of `file` to `dst`.
    ///
    /// Returns the dimensions of the generated thumbnail.
    pub fn generate(file: &MediaFile, dst: &Path, target_height: u32) -> Result<Dimensions> {
        debug!(src = ?file.path(), ?dst, target_height, "Generating thumbnail");

        let img = preview::preview(file);
        let (width, height) = img.dimensions();
        let size = Self::calculate_dimensions(Dimensions::new(width, height), target_height);

        let thumbnail = img.resize_exact(size.width, size.height, FilterType::CatmullRom);
        Self::save_image(&thumbnail, dst)?;

        Ok(size)
    }

    /// Size of the thumbnail for a `source` sized file at `target_height`.
    ///
    /// Sources shorter than `target_height` keep their height.
    pub fn calculate_dimensions(source: Dimensions, target_height: u32) -> Dimensions {
        if source.width == 0 || source.height == 0 {
            return Dimensions::new(target_height, target_height);
        }

        let height = target_height.min(source.height);
        let ratio = f64::from(source.width) / f64::from(source.height);
        let scaled = (f64::from(height) * ratio).round() as u32;
        let width = scaled.clamp(MIN_THUMB_WIDTH, MAX_THUMB_WIDTH);

        let height = if width == scaled {
            height
        } else {
            (f64::from(width) / ratio).round() as u32
        };
        Dimensions::new(width.max(1), height.max(1))
    }

    /// Save an image, as JPEG for `.jpg`/`.jpeg` paths and by extension
    /// otherwise. Parent directories are created.
    pub fn save_image(img: &DynamicImage, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let is_jpeg = dst
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                ext == "jpg" || ext == "jpeg"
            })
            .unwrap_or(false);

        if is_jpeg {
            use std::fs::File;
            use std::io::BufWriter;

            let file = File::create(dst)
                .with_context(|| format!("Failed to create image file: {:?}", dst))?;
            let mut writer = BufWriter::new(file);

            // No alpha channel in JPEG
            let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
            img.to_rgb8()
                .write_with_encoder(encoder)
                .with_context(|| format!("Failed to encode image: {:?}", dst))?;
        } else {
            img.save(dst)
                .with_context(|| format!("Failed to save image: {:?}", dst))?;
        }

        debug!(?dst, "Saved image");
        Ok(())
    }
}

/// Folder tile showing the newest file of a directory.
#[derive(Debug, Clone)]
pub struct DirectoryThumbnail {
    directory: PathBuf,
    size: u32,
}

impl DirectoryThumbnail {
    pub fn new(directory: impl Into<PathBuf>, size: u32) -> Self {
        Self {
            directory: directory.into(),
            size: size.max(1),
        }
    }

    /// The composited tile, memoized until the directory listing changes.
    pub fn image(&self) -> Result<Arc<RgbaImage>> {
        let key = DIR_THUMB_CACHE
            .key("", "final_thumbnail")
            .part(absolute_dir(&self.directory).display())
            .part(self.size);

        DIR_THUMB_CACHE.get_or_try_insert_with(key, || self.compose().map(Arc::new))
    }

    /// Most recently modified file in the directory.
    pub fn newest_file(&self) -> Result<Option<MediaFile>> {
        let files = FileScanner::default().files_from_dir(&self.directory)?;
        let newest = files
            .iter()
            .map(MediaFile::new)
            .filter_map(|file| file.modified().ok().map(|time| (time, file)))
            .max_by_key(|(time, _)| *time)
            .map(|(_, file)| file);
        Ok(newest)
    }

    fn compose(&self) -> Result<RgbaImage> {
        let mut tile = folder_tile(self.size);

        let Some(file) = self.newest_file()? else {
            debug!(dir = ?self.directory, "Empty directory, plain folder tile");
            return Ok(tile);
        };

        let size = self.size as f64;
        let source = preview::dimensions(&file);
        if source.width <= 1 && source.height <= 1 {
            warn!(path = ?file.path(), "No preview for newest file");
            return Ok(tile);
        }

        let (width, height) = preview::fit_dimensions(source, size * 0.88, size * 0.54);
        let inner = preview::preview(&file)
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgba8();

        let x = (self.size as i64 - width as i64) / 2;
        let y = (size * 0.62).round() as i64 - height as i64 / 2;
        imageops::overlay(&mut tile, &inner, x, y);

        debug!(dir = ?self.directory, newest = ?file.path(), "Composed directory thumbnail");
        Ok(tile)
    }
}

/// Transparent square with a folder shape: a tab and a body.
fn folder_tile(size: u32) -> RgbaImage {
    let s = size as f64;
    let mut tile = RgbaImage::new(size, size);

    fill(&mut tile, (0.04 * s, 0.12 * s), (0.42 * s, 0.24 * s), FOLDER_BACK);
    fill(&mut tile, (0.04 * s, 0.2 * s), (0.96 * s, 0.34 * s), FOLDER_BACK);
    fill(&mut tile, (0.02 * s, 0.3 * s), (0.98 * s, 0.94 * s), FOLDER_FRONT);

    tile
}

fn fill(img: &mut RgbaImage, from: (f64, f64), to: (f64, f64), color: Rgba<u8>) {
    let (x0, y0) = (from.0.round() as u32, from.1.round() as u32);
    let x1 = (to.0.round() as u32).min(img.width());
    let y1 = (to.1.round() as u32).min(img.height());

    for y in y0..y1 {
        for x in x0..x1 {
            img.put_pixel(x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Invalidate;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    fn write_solid(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(8, 4, Rgb(color)).save(path).unwrap();
    }

    fn set_mtime(path: &Path, secs_ago: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(secs_ago))
            .unwrap();
    }

    #[test]
    fn test_thumbnail_sizes() {
        let size = |w, h, target| {
            let d = ThumbnailGenerator::calculate_dimensions(Dimensions::new(w, h), target);
            (d.width, d.height)
        };

        // Scanned page, portrait
        assert_eq!(size(1200, 1800, 256), (171, 256));
        // Icons are raised to the width floor
        assert_eq!(size(48, 48, 256), (64, 64));
        // Panorama strips hit the width cap and lose height
        assert_eq!(size(8000, 500, 256), (1024, 64));
        // Tall strips hit the width floor and keep the ratio
        assert_eq!(size(100, 2000, 256), (64, 1280));
        assert_eq!(size(0, 10, 128), (128, 128));
    }

    #[test]
    fn test_generate_writes_jpeg() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.png");
        RgbImage::from_pixel(600, 300, Rgb([10, 200, 10])).save(&src).unwrap();

        let dst = dir.path().join("out").join("thumb.jpg");
        let dims = ThumbnailGenerator::generate(&MediaFile::new(&src), &dst, 100).unwrap();

        assert_eq!(dims, Dimensions::new(200, 100));
        let written = image::open(&dst).unwrap();
        assert_eq!(written.dimensions(), (200, 100));
    }

    #[test]
    fn test_empty_directory_gives_plain_folder() {
        let dir = tempdir().unwrap();
        let thumb = DirectoryThumbnail::new(dir.path(), 64);

        assert!(thumb.newest_file().unwrap().is_none());
        let img = thumb.image().unwrap();
        assert_eq!(img.dimensions(), (64, 64));
        assert_eq!(*img.get_pixel(32, 40), FOLDER_FRONT);
        assert_eq!(img.get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_newest_file_is_embedded() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.png");
        let new = dir.path().join("new.png");
        write_solid(&old, [255, 0, 0]);
        write_solid(&new, [0, 0, 255]);
        set_mtime(&old, 3600);
        set_mtime(&new, 10);

        let thumb = DirectoryThumbnail::new(dir.path(), 100);
        let newest = thumb.newest_file().unwrap().unwrap();
        assert_eq!(newest.path(), new.as_path());

        let img = thumb.image().unwrap();
        let center = img.get_pixel(50, 62);
        assert!(center[2] > 200 && center[0] < 50);
    }

    #[test]
    fn test_thumbnail_dropped_with_listing() {
        let dir = tempdir().unwrap();
        let thumb = DirectoryThumbnail::new(dir.path(), 32);
        let first = thumb.image().unwrap();

        // Cached until the listing is invalidated
        assert!(Arc::ptr_eq(&first, &thumb.image().unwrap()));

        SCANNER_CACHE.invalidate(&absolute_dir(dir.path()).display().to_string());
        assert!(!Arc::ptr_eq(&first, &thumb.image().unwrap()));
    }
}
