use std::fmt;
use std::path::Path;

/// Kind of media a file holds, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Image,
    Gif,
    Video,
    Pdf,
    Epub,
    Archive,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "jpe", "png", "webp", "bmp", "tif", "tiff"];
const GIF_EXTENSIONS: &[&str] = &["gif"];
const VIDEO_EXTENSIONS: &[&str] = &[
    "avi", "mp4", "flv", "wmv", "mpg", "mov", "m4v", "webm", "mkv",
];
const PDF_EXTENSIONS: &[&str] = &["pdf"];
const EPUB_EXTENSIONS: &[&str] = &["epub"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar"];

impl MediaKind {
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Image,
        MediaKind::Gif,
        MediaKind::Video,
        MediaKind::Pdf,
        MediaKind::Epub,
        MediaKind::Archive,
    ];

    /// Kinds probed before falling back to `Image`.
    const PROBE_ORDER: [MediaKind; 5] = [
        MediaKind::Pdf,
        MediaKind::Epub,
        MediaKind::Video,
        MediaKind::Gif,
        MediaKind::Archive,
    ];

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => IMAGE_EXTENSIONS,
            MediaKind::Gif => GIF_EXTENSIONS,
            MediaKind::Video => VIDEO_EXTENSIONS,
            MediaKind::Pdf => PDF_EXTENSIONS,
            MediaKind::Epub => EPUB_EXTENSIONS,
            MediaKind::Archive => ARCHIVE_EXTENSIONS,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Gif => "gif",
            MediaKind::Video => "video",
            MediaKind::Pdf => "pdf",
            MediaKind::Epub => "epub",
            MediaKind::Archive => "archive",
        }
    }

    /// Plural name used by the `--allow-*` command line options.
    pub fn option_name(self) -> &'static str {
        match self {
            MediaKind::Image => "images",
            MediaKind::Gif => "gifs",
            MediaKind::Video => "videos",
            MediaKind::Pdf => "pdfs",
            MediaKind::Epub => "epubs",
            MediaKind::Archive => "archives",
        }
    }

    pub fn from_option_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.option_name() == name)
    }

    /// Strict lookup: `None` for extensions no kind claims.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.extensions().contains(&ext.as_str()))
    }

    /// Factory rule: the first probed kind whose extension ends the file
    /// name wins, anything else is treated as an image.
    pub fn for_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self::PROBE_ORDER
            .into_iter()
            .find(|kind| {
                kind.extensions()
                    .iter()
                    .any(|ext| name.ends_with(&format!(".{}", ext)))
            })
            .unwrap_or(MediaKind::Image)
    }

    /// Whether previews come from decoding the file itself.
    pub fn is_decodable(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Gif)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
