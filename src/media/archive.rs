//! Zip archive helpers: entry reading, preview selection and extraction.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use image::DynamicImage;
use tracing::{debug, warn};
use zip::ZipArchive;

use super::kind::MediaKind;

/// Largest entry read into memory.
const MAX_ENTRY_SIZE: u64 = 256 * 1024 * 1024;

/// Read a whole archive entry into memory.
pub fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    read_entry_limited(archive, name, MAX_ENTRY_SIZE)
}

/// Like `read_entry`, failing once more than `limit` bytes come out.
/// The size recorded in the archive header is not trusted.
fn read_entry_limited<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .with_context(|| format!("Missing archive entry: {}", name))?;

    let mut bytes = Vec::new();
    entry
        .take(limit + 1)
        .read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read archive entry: {}", name))?;
    if bytes.len() as u64 > limit {
        bail!("Archive entry {} is larger than {} bytes", name, limit);
    }
    Ok(bytes)
}

fn open_zip(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    if !is_zip(path) {
        bail!("Only zip archives can be opened without external tools: {:?}", path);
    }
    let file = File::open(path).with_context(|| format!("Failed to open archive: {:?}", path))?;
    ZipArchive::new(BufReader::new(file))
        .with_context(|| format!("Failed to read archive: {:?}", path))
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

/// Preview of an archive: its first image entry in name order.
pub fn first_image(path: &Path) -> Result<DynamicImage> {
    let mut archive = open_zip(path)?;

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(MediaKind::from_extension)
                .is_some_and(MediaKind::is_decodable)
        })
        .map(str::to_string)
        .collect();
    names.sort();

    let first = names
        .first()
        .ok_or_else(|| anyhow!("Archive contains no images: {:?}", path))?;
    let bytes = read_entry(&mut archive, first)?;
    image::load_from_memory(&bytes)
        .with_context(|| format!("Failed to decode {} from {:?}", first, path))
}

/// Progress of an archive extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractProgress {
    /// Entry just written (relative to the destination).
    pub entry: String,
    /// Fraction of entries processed, in `0.0..=1.0`.
    pub fraction: f64,
}

/// Entry-by-entry extraction of a zip archive.
///
/// Each `next()` writes one entry, so the iterator can be driven from a
/// background thread and report progress as it goes.
pub struct Extraction {
    archive: ZipArchive<BufReader<File>>,
    destination: PathBuf,
    index: usize,
}

impl Extraction {
    pub fn new(path: &Path, destination: &Path) -> Result<Self> {
        let archive = open_zip(path)?;
        fs::create_dir_all(destination)
            .with_context(|| format!("Failed to create {:?}", destination))?;
        debug!(?path, ?destination, entries = archive.len(), "Extracting archive");

        Ok(Self {
            archive,
            destination: destination.to_path_buf(),
            index: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    fn extract_one(&mut self, index: usize) -> Result<String> {
        let mut entry = self
            .archive
            .by_index(index)
            .with_context(|| format!("Failed to read archive entry #{}", index))?;
        let name = entry.name().to_string();

        // Entries escaping the destination are skipped
        let Some(relative) = entry.enclosed_name() else {
            warn!(entry = %name, "Skipping archive entry with unsafe path");
            return Ok(name);
        };
        let target = self.destination.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {:?}", target))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
            let mut out =
                File::create(&target).with_context(|| format!("Failed to create {:?}", target))?;
            io::copy(&mut entry, &mut out)
                .with_context(|| format!("Failed to extract {} to {:?}", name, target))?;
        }

        Ok(name)
    }
}

impl Iterator for Extraction {
    type Item = Result<ExtractProgress>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.archive.len();
        if self.index >= total {
            return None;
        }

        let index = self.index;
        self.index += 1;

        Some(self.extract_one(index).map(|entry| ExtractProgress {
            entry,
            fraction: self.index as f64 / total as f64,
        }))
    }
}
