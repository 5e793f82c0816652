//! Command line configuration.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::media::MediaKind;
use crate::scanner::{FileScanner, FileTypeFilter};

pub const USAGE: &str = "\
Usage: mediasort [options] FILE...

Browse and sort media files. Commands are read from standard input,
type 'help' once started.

Options:
  -r, --recursive        Browse every directory below the arguments
  -c, --check            Report directories mixing files and subdirectories
  -s, --stats            Count files per media kind
  -b, --base-dir DIR     Directory relative move targets resolve against
      --allow-images     Only browse the allowed kinds (repeatable;
      --allow-gifs         no option allows everything)
      --allow-videos
      --allow-pdfs
      --allow-epubs
      --allow-archives
      --trash-dir DIR    Trash into DIR instead of the desktop trash
      --db PATH          Session database (default: XDG data dir)
  -h, --help             Show this help";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Browse,
    Check,
    Stats,
    Help,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    pub files: Vec<PathBuf>,
    pub recursive: bool,
    pub base_dir: Option<PathBuf>,
    pub allowed: Vec<MediaKind>,
    pub trash_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
}

impl Config {
    /// Parse the process arguments.
    pub fn from_env() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut config = Config::default();
        let mut check = false;
        let mut stats = false;

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-h" | "--help" => config.mode = Mode::Help,
                "-r" | "--recursive" => config.recursive = true,
                "-c" | "--check" => check = true,
                "-s" | "--stats" => stats = true,
                "-b" | "--base-dir" => {
                    let value = args.next().context("Missing value for --base-dir")?;
                    config.base_dir = Some(PathBuf::from(value));
                }
                "--trash-dir" => {
                    let value = args.next().context("Missing value for --trash-dir")?;
                    config.trash_dir = Some(PathBuf::from(value));
                }
                "--db" => {
                    let value = args.next().context("Missing value for --db")?;
                    config.db_path = Some(PathBuf::from(value));
                }
                "--" => config.files.extend(args.by_ref().map(PathBuf::from)),
                _ => {
                    if let Some(kind) = arg.strip_prefix("--allow-") {
                        let kind = MediaKind::from_option_name(kind)
                            .with_context(|| format!("Unknown option: {}", arg))?;
                        config.allowed.push(kind);
                    } else if arg.starts_with('-') && arg != "-" {
                        bail!("Unknown option: {}", arg);
                    } else {
                        config.files.push(PathBuf::from(arg));
                    }
                }
            }
        }

        if config.mode != Mode::Help {
            config.mode = match (check, stats) {
                (true, true) => bail!("--check and --stats cannot be combined"),
                (true, false) => Mode::Check,
                (false, true) => Mode::Stats,
                (false, false) => Mode::Browse,
            };
        }

        if config.files.is_empty() {
            config.files.push(PathBuf::from("."));
        }

        Ok(config)
    }

    pub fn filter(&self) -> FileTypeFilter {
        FileTypeFilter::from_kinds(&self.allowed)
    }

    pub fn scanner(&self) -> FileScanner {
        FileScanner::new(self.filter(), self.recursive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config> {
        Config::parse(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.mode, Mode::Browse);
        assert_eq!(config.files, vec![PathBuf::from(".")]);
        assert_eq!(config.filter(), FileTypeFilter::all());
    }

    #[test]
    fn test_flags_and_values() {
        let config = parse(&[
            "-r",
            "--allow-gifs",
            "--allow-videos",
            "-b",
            "/sorted",
            "--trash-dir",
            "/tmp/trash",
            "a",
            "b",
        ])
        .unwrap();

        assert!(config.recursive);
        assert_eq!(config.allowed, vec![MediaKind::Gif, MediaKind::Video]);
        assert_eq!(config.base_dir, Some(PathBuf::from("/sorted")));
        assert_eq!(config.trash_dir, Some(PathBuf::from("/tmp/trash")));
        assert_eq!(config.files, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }

    #[test]
    fn test_modes() {
        assert_eq!(parse(&["-c"]).unwrap().mode, Mode::Check);
        assert_eq!(parse(&["--stats"]).unwrap().mode, Mode::Stats);
        assert_eq!(parse(&["-c", "-h"]).unwrap().mode, Mode::Help);
        assert!(parse(&["-c", "-s"]).is_err());
    }

    #[test]
    fn test_errors() {
        assert!(parse(&["--base-dir"]).is_err());
        assert!(parse(&["--allow-sounds"]).is_err());
        assert!(parse(&["--bogus"]).is_err());
    }

    #[test]
    fn test_double_dash_takes_rest_as_files() {
        let config = parse(&["--", "-weird-name.jpg"]).unwrap();
        assert_eq!(config.files, vec![PathBuf::from("-weird-name.jpg")]);
    }
}
