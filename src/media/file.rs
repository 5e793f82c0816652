//! File handles for browsed media.
//!
//! A `MediaFile` wraps a path plus the view state the browser keeps for it
//! (rotation and flips). Renames move the file on disk and keep the handle
//! pointing at the new location.

use std::fmt;
use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use thiserror::Error;
use tracing::{debug, trace};
use xxhash_rust::xxh3::Xxh3;

use super::kind::MediaKind;
use crate::cache::{Cache, Invalidate};

/// Suffix appended to the file stem of starred files.
pub const STAR_MARKER: &str = " (S)";

/// Number of content digests kept in memory.
const DIGEST_CACHE_LIMIT: usize = 256;

/// Read buffer size for hashing.
const DIGEST_CHUNK: usize = 64 * 1024;

static DIGEST_CACHE: Lazy<Cache<String>> =
    Lazy::new(|| Cache::new("digest", Some(DIGEST_CACHE_LIMIT)));

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("'{}' is already starred", .0.display())]
    AlreadyStarred(PathBuf),
    #[error("'{}' is not starred", .0.display())]
    NotStarred(PathBuf),
    #[error("'{}' already exists!", .0.display())]
    TargetExists(PathBuf),
}

/// A file in the browsed list.
#[derive(Debug, Clone)]
pub struct MediaFile {
    path: PathBuf,
    kind: MediaKind,
    /// Clockwise rotation in degrees: 0, 90, 180 or 270.
    rotation: u16,
    flip_h: bool,
    flip_v: bool,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let kind = MediaKind::for_path(&path);
        Self {
            path,
            kind,
            rotation: 0,
            flip_h: false,
            flip_v: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn dirname(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new(""))
    }

    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn metadata(&self) -> Result<Metadata> {
        fs::metadata(&self.path).with_context(|| format!("Failed to stat {:?}", self.path))
    }

    pub fn size(&self) -> Result<FileSize> {
        Ok(FileSize(self.metadata()?.len()))
    }

    pub fn modified(&self) -> Result<Timestamp> {
        let time = self.metadata()?.modified().context("Modification time unavailable")?;
        Ok(Timestamp(time))
    }

    pub fn accessed(&self) -> Result<Timestamp> {
        let time = self.metadata()?.accessed().context("Access time unavailable")?;
        Ok(Timestamp(time))
    }

    pub fn created(&self) -> Result<Timestamp> {
        let time = self.metadata()?.created().context("Creation time unavailable")?;
        Ok(Timestamp(time))
    }

    /// Content fingerprint used to detect duplicates.
    ///
    /// Memoized per path, modification time and size.
    pub fn digest(&self) -> Result<String> {
        let metadata = self.metadata()?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let key = DIGEST_CACHE
            .key(self.path.display(), "digest")
            .part(mtime)
            .part(metadata.len());

        DIGEST_CACHE.get_or_try_insert_with(key, || hash_file(&self.path))
    }

    /// Move the file to `new_path` and point the handle at it.
    pub fn rename(&mut self, new_path: &Path) -> Result<()> {
        move_path(&self.path, new_path)?;
        debug!(from = ?self.path, to = ?new_path, "Renamed file");
        super::forget_path(&self.path);
        self.path = new_path.to_path_buf();
        Ok(())
    }

    pub fn is_starred(&self) -> bool {
        let basename = self.basename();
        let (stem, _) = split_name(&basename);
        stem.ends_with(STAR_MARKER)
    }

    /// Add or remove the star marker by renaming the file.
    pub fn set_starred(&mut self, starred: bool) -> Result<()> {
        match (self.is_starred(), starred) {
            (true, true) => return Err(MediaError::AlreadyStarred(self.path.clone()).into()),
            (false, false) => return Err(MediaError::NotStarred(self.path.clone()).into()),
            _ => {}
        }

        let new_name = starred_name(&self.basename(), starred);
        let new_path = self.dirname().join(new_name);
        self.rename(&new_path)
    }

    pub fn rotate(&mut self, clockwise: bool) {
        let step = if clockwise { 90 } else { 270 };
        self.rotation = (self.rotation + step) % 360;
    }

    pub fn toggle_flip(&mut self, horizontal: bool) {
        if horizontal {
            self.flip_h = !self.flip_h;
        } else {
            self.flip_v = !self.flip_v;
        }
    }

    pub fn rotation(&self) -> u16 {
        self.rotation
    }

    pub fn flipped_horizontally(&self) -> bool {
        self.flip_h
    }

    pub fn flipped_vertically(&self) -> bool {
        self.flip_v
    }
}

impl PartialEq<Path> for MediaFile {
    fn eq(&self, other: &Path) -> bool {
        self.path.as_path() == other
    }
}

/// Split a file name at its last dot: `("photo (S)", Some("jpg"))`.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// File name with the star marker added or removed.
pub fn starred_name(name: &str, starred: bool) -> String {
    let (stem, ext) = split_name(name);
    let stem = if starred {
        format!("{}{}", stem, STAR_MARKER)
    } else {
        stem.strip_suffix(STAR_MARKER).unwrap_or(stem).to_string()
    };

    match ext {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// `name (n).ext` for the first `n >= 1` not present in `dir`.
pub fn safe_candidate(dir: &Path, name: &str) -> String {
    let (stem, ext) = split_name(name);
    let mut candidate = name.to_string();
    let mut index = 0;

    while dir.join(&candidate).is_file() {
        index += 1;
        candidate = match ext {
            Some(ext) => format!("{} ({}).{}", stem, index, ext),
            None => format!("{} ({})", stem, index),
        };
    }

    candidate
}

/// Resolved absolute form of a directory path; an empty path means the
/// current dir. Symlinks and `..` are resolved when the directory exists.
pub fn absolute_dir(dir: &Path) -> PathBuf {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    fs::canonicalize(dir).unwrap_or_else(|_| lexical_absolute(dir))
}

/// Absolute path with `.` and `..` folded away, without touching the disk.
pub fn lexical_absolute(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    normal
}

/// Whether two paths name the same existing file.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Move a file, refusing to overwrite and falling back to copy + remove
/// when a plain rename fails (e.g. across filesystems).
pub fn move_path(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Err(MediaError::TargetExists(to.to_path_buf()).into());
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) => {
            debug!(?from, ?to, error = %err, "Rename failed, copying instead");
            fs::copy(from, to).with_context(|| format!("Failed to move {:?} to {:?}", from, to))?;
            fs::remove_file(from)
                .with_context(|| format!("Failed to remove {:?} after copying", from))?;
            Ok(())
        }
    }
}

fn hash_file(path: &Path) -> Result<String> {
    trace!(?path, "Hashing file");
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];

    loop {
        let read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read {:?}", path))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}

pub(super) fn forget_digests(path: &Path) {
    DIGEST_CACHE.invalidate(&path.display().to_string());
}

/// File size with human readable display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileSize(pub u64);

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * 1024;

        if self.0 < KB {
            write!(f, "{} bytes", self.0)
        } else if self.0 < MB {
            write!(f, "{:.2} Kb", self.0 as f64 / KB as f64)
        } else {
            write!(f, "{:.2} Mb", self.0 as f64 / MB as f64)
        }
    }
}

/// File timestamp, displayed in local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub SystemTime);

impl Timestamp {
    pub fn unix_seconds(&self) -> i64 {
        match self.0.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.unix_seconds();
        let formatted = glib::DateTime::from_unix_local(secs)
            .and_then(|dt| dt.format("%a %b %d %Y %H:%M:%S"));

        match formatted {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "@{}", secs),
        }
    }
}

/// Pixel dimensions, displayed as `WxH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
