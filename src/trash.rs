//! Desktop trash integration.
//!
//! `TrashDir` implements the freedesktop.org trash layout on any directory:
//! trashed files live in `files/` and each one has an `info/<name>.trashinfo`
//! recording its original path and deletion date. `DesktopTrash` trashes
//! through gio and restores from the user's home trash.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gio::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::media::file::{absolute_dir, lexical_absolute, move_path};

const INFO_HEADER: &str = "[Trash Info]";
const INFO_EXTENSION: &str = "trashinfo";

#[derive(Debug, Error)]
pub enum TrashError {
    #[error("Couldn't find '{}' in trash", .0.display())]
    NotFound(PathBuf),
}

/// Place deleted files can be restored from.
pub trait Trash {
    fn trash(&self, path: &Path) -> Result<()>;
    fn restore(&self, path: &Path) -> Result<()>;
}

/// Trash directory following the freedesktop.org layout.
#[derive(Debug, Clone)]
pub struct TrashDir {
    root: PathBuf,
}

struct TrashEntry {
    info_file: PathBuf,
    trashed: PathBuf,
    deleted_at: String,
}

impl TrashDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The user's home trash, `$XDG_DATA_HOME/Trash`.
    pub fn home() -> Self {
        Self::new(glib::user_data_dir().join("Trash"))
    }

    fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    fn info_dir(&self) -> PathBuf {
        self.root.join("info")
    }

    /// File name in `files/` not clashing with a trashed file or info entry.
    fn free_name(&self, name: &str) -> String {
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };

        let taken = |candidate: &str| {
            self.files_dir().join(candidate).exists()
                || self
                    .info_dir()
                    .join(format!("{}.{}", candidate, INFO_EXTENSION))
                    .exists()
        };

        let mut candidate = name.to_string();
        let mut index = 1;
        while taken(&candidate) {
            index += 1;
            candidate = match ext {
                Some(ext) => format!("{}.{}.{}", stem, index, ext),
                None => format!("{}.{}", stem, index),
            };
        }
        candidate
    }

    fn entries(&self) -> Result<Vec<(PathBuf, TrashEntry)>> {
        let info_dir = self.info_dir();
        if !info_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&info_dir).with_context(|| format!("Failed to list {:?}", info_dir))? {
            let info_file = entry?.path();
            if info_file.extension().and_then(|e| e.to_str()) != Some(INFO_EXTENSION) {
                continue;
            }

            let Ok(contents) = fs::read_to_string(&info_file) else {
                debug!(?info_file, "Skipping unreadable trash info");
                continue;
            };
            let Some((original, deleted_at)) = parse_info(&contents) else {
                debug!(?info_file, "Skipping malformed trash info");
                continue;
            };

            let Some(name) = info_file.file_stem() else {
                continue;
            };
            let trashed = self.files_dir().join(name);
            entries.push((
                original,
                TrashEntry {
                    info_file,
                    trashed,
                    deleted_at,
                },
            ));
        }
        Ok(entries)
    }
}

impl Trash for TrashDir {
    fn trash(&self, path: &Path) -> Result<()> {
        let original = absolute_path(path);
        let name = path
            .file_name()
            .with_context(|| format!("Cannot trash {:?}", path))?
            .to_string_lossy()
            .into_owned();

        fs::create_dir_all(self.files_dir())
            .with_context(|| format!("Failed to create {:?}", self.files_dir()))?;
        fs::create_dir_all(self.info_dir())
            .with_context(|| format!("Failed to create {:?}", self.info_dir()))?;

        let name = self.free_name(&name);
        let trashed = self.files_dir().join(&name);
        let info_file = self.info_dir().join(format!("{}.{}", name, INFO_EXTENSION));

        move_path(path, &trashed)?;
        if let Err(err) = fs::write(&info_file, format_info(&original)) {
            // Put the file back so it is not lost without an info entry
            move_path(&trashed, path)?;
            return Err(err).with_context(|| format!("Failed to write {:?}", info_file));
        }

        info!(?path, ?trashed, "Moved to trash");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<()> {
        let original = absolute_path(path);
        let lexical = lexical_absolute(path);

        let entry = self
            .entries()?
            .into_iter()
            .filter(|(candidate, _)| {
                *candidate == original || *candidate == lexical || absolute_path(candidate) == original
            })
            .map(|(_, entry)| entry)
            .max_by(|a, b| a.deleted_at.cmp(&b.deleted_at))
            .ok_or_else(|| TrashError::NotFound(path.to_path_buf()))?;

        if let Some(parent) = original.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
        }
        move_path(&entry.trashed, &original)?;
        fs::remove_file(&entry.info_file)
            .with_context(|| format!("Failed to remove {:?}", entry.info_file))?;

        info!(?path, "Restored from trash");
        Ok(())
    }
}

/// Trash through gio, restoring from the home trash.
#[derive(Debug, Clone, Default)]
pub struct DesktopTrash;

impl Trash for DesktopTrash {
    fn trash(&self, path: &Path) -> Result<()> {
        gio::File::for_path(path)
            .trash(gio::Cancellable::NONE)
            .with_context(|| format!("Failed to trash {:?}", path))?;
        info!(?path, "Moved to trash");
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<()> {
        TrashDir::home().restore(path)
    }
}

/// Absolute path with the parent directory resolved.
fn absolute_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => absolute_dir(parent).join(name),
        _ => absolute_dir(path),
    }
}

fn format_info(original: &Path) -> String {
    let escaped = glib::uri_escape_string(original.to_string_lossy().as_ref(), Some("/"), false);
    let deleted_at = glib::DateTime::now_local()
        .and_then(|now| now.format("%Y-%m-%dT%H:%M:%S"))
        .map(|s| s.to_string())
        .unwrap_or_default();

    format!(
        "{}\nPath={}\nDeletionDate={}\n",
        INFO_HEADER, escaped, deleted_at
    )
}

fn parse_info(contents: &str) -> Option<(PathBuf, String)> {
    let mut lines = contents.lines().map(str::trim);
    if lines.next()? != INFO_HEADER {
        return None;
    }

    let mut original = None;
    let mut deleted_at = String::new();
    for line in lines {
        if let Some(value) = line.strip_prefix("Path=") {
            let unescaped = glib::uri_unescape_string(value, None::<&str>)?;
            original = Some(PathBuf::from(unescaped.as_str()));
        } else if let Some(value) = line.strip_prefix("DeletionDate=") {
            deleted_at = value.to_string();
        }
    }

    original.map(|path| (path, deleted_at))
}
