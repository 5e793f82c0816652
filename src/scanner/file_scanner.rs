//! File discovery for the browser.
//!
//! This module provides the `FileScanner` struct which handles:
//! - Directory listings filtered by media kind (memoized per directory)
//! - Resolving command line arguments into a file list and a start file
//! - Recursive scanning using walkdir
//! - Directory layout checks and per-kind statistics

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::filter::FileTypeFilter;
use crate::cache::Cache;
use crate::media::file::absolute_dir;
use crate::media::MediaKind;

/// Directory listings shared by every scanner.
///
/// Keys are `("files", <absolute dir>, <filter>)`; other caches derived from
/// a directory chain to this one so `invalidate(<absolute dir>)` drops them
/// too.
pub static SCANNER_CACHE: Lazy<Cache<Arc<Vec<PathBuf>>>> =
    Lazy::new(|| Cache::shared("scanner", None));

/// Files resolved from command line arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    pub files: Vec<PathBuf>,
    /// File to select first, when a single file was given.
    pub start_file: Option<PathBuf>,
}

/// Layout problem found by [`FileScanner::check_directories`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryIssue {
    /// Subdirectories next to `files` files.
    Mixed { dir: PathBuf, files: usize },
    Empty { dir: PathBuf },
}

impl fmt::Display for DirectoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryIssue::Mixed { dir, files } => write!(
                f,
                "'{}': dirs and files mixed ({} files)",
                dir.display(),
                files
            ),
            DirectoryIssue::Empty { dir } => write!(f, "'{}': empty", dir.display()),
        }
    }
}

/// Scanner resolving paths into browsable files.
#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    filter: FileTypeFilter,
    recursive: bool,
}

impl FileScanner {
    pub fn new(filter: FileTypeFilter, recursive: bool) -> Self {
        Self { filter, recursive }
    }

    pub fn filter(&self) -> &FileTypeFilter {
        &self.filter
    }

    /// Sorted allowed files directly inside `dir`.
    ///
    /// Paths are `dir` joined with each file name, so an empty `dir` yields
    /// bare file names from the current directory.
    pub fn files_from_dir(&self, dir: &Path) -> Result<Arc<Vec<PathBuf>>> {
        let key = SCANNER_CACHE
            .key("", "files")
            .part(absolute_dir(dir).display())
            .part(self.filter.signature());

        SCANNER_CACHE.get_or_try_insert_with(key, || self.list_dir(dir).map(Arc::new))
    }

    fn list_dir(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let root = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
            let entry = entry.with_context(|| format!("Failed to list {:?}", root))?;
            if entry.file_type().is_dir() {
                continue;
            }

            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }

            let path = dir.join(name);
            if self.filter.has_allowed_ext(&path) {
                files.push(path);
            }
        }

        files.sort();
        debug!(?dir, count = files.len(), "Listed directory");
        Ok(files)
    }

    /// Resolve command line arguments.
    ///
    /// - one directory: its files
    /// - one file: the files of its directory, starting at that file
    /// - several arguments: listings of the directories plus allowed files
    /// - recursive mode: listings of every directory below each argument
    pub fn files_from_args(&self, args: &[PathBuf]) -> Result<ScanResult> {
        let result = if self.recursive {
            self.files_from_args_recursive(args)?
        } else if let [arg] = args {
            self.files_from_single_arg(arg)?
        } else {
            let mut files = Vec::new();
            for arg in args {
                if arg.is_dir() {
                    files.extend(self.files_from_dir(arg)?.iter().cloned());
                } else if self.filter.has_allowed_ext(arg) {
                    files.push(arg.clone());
                } else {
                    warn!(path = ?arg, "Skipping file with unsupported extension");
                }
            }
            ScanResult {
                files,
                start_file: None,
            }
        };

        info!(files = result.files.len(), "Resolved arguments");
        Ok(result)
    }

    fn files_from_single_arg(&self, arg: &Path) -> Result<ScanResult> {
        if arg.is_dir() {
            return Ok(ScanResult {
                files: self.files_from_dir(arg)?.to_vec(),
                start_file: None,
            });
        }

        let start_file = self.filter.has_allowed_ext(arg).then(|| arg.to_path_buf());
        let dir = arg.parent().unwrap_or_else(|| Path::new(""));
        Ok(ScanResult {
            files: self.files_from_dir(dir)?.to_vec(),
            start_file,
        })
    }

    fn files_from_args_recursive(&self, args: &[PathBuf]) -> Result<ScanResult> {
        let mut files = Vec::new();

        for arg in args {
            for entry in WalkDir::new(arg).sort_by_file_name() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(error = %err, "Skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    files.extend(self.files_from_dir(entry.path())?.iter().cloned());
                }
            }
        }

        Ok(ScanResult {
            files,
            start_file: None,
        })
    }

    /// Report directories that mix subdirectories with files, and empty ones.
    pub fn check_directories(args: &[PathBuf]) -> Result<Vec<DirectoryIssue>> {
        let mut issues = Vec::new();

        for arg in args {
            for entry in WalkDir::new(arg).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {:?}", arg))?;
                if !entry.file_type().is_dir() {
                    continue;
                }

                let mut dirs = 0;
                let mut files = 0;
                for child in fs::read_dir(entry.path())
                    .with_context(|| format!("Failed to list {:?}", entry.path()))?
                {
                    let child = child?;
                    if child.file_type()?.is_dir() {
                        dirs += 1;
                    } else {
                        files += 1;
                    }
                }

                let dir = entry.path().to_path_buf();
                if dirs > 0 && files > 0 {
                    issues.push(DirectoryIssue::Mixed { dir, files });
                } else if dirs == 0 && files == 0 {
                    issues.push(DirectoryIssue::Empty { dir });
                }
            }
        }

        Ok(issues)
    }

    /// Number of files per media kind description.
    pub fn stats(files: &[PathBuf]) -> BTreeMap<&'static str, usize> {
        let mut counter = BTreeMap::new();
        for path in files {
            *counter
                .entry(MediaKind::for_path(path).description())
                .or_insert(0) += 1;
        }
        counter
    }
}
