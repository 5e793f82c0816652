use std::path::Path;

use crate::media::MediaKind;

/// Set of media kinds the browser accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeFilter {
    kinds: Vec<MediaKind>,
}

impl FileTypeFilter {
    /// Accept every known kind.
    pub fn all() -> Self {
        Self {
            kinds: MediaKind::ALL.to_vec(),
        }
    }

    /// Accept only `kinds`; an empty selection accepts everything.
    pub fn from_kinds(kinds: &[MediaKind]) -> Self {
        if kinds.is_empty() {
            return Self::all();
        }
        let mut kinds = kinds.to_vec();
        kinds.sort();
        kinds.dedup();
        Self { kinds }
    }

    /// Whether any allowed `.ext` occurs in the lowercased file name.
    pub fn has_allowed_ext(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_lowercase();

        self.kinds
            .iter()
            .flat_map(|kind| kind.extensions())
            .any(|ext| name.contains(&format!(".{}", ext)))
    }

    /// Stable text form, used to scope cached listings to the filter.
    pub fn signature(&self) -> String {
        self.kinds
            .iter()
            .map(|kind| kind.option_name())
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl Default for FileTypeFilter {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_selection_allows_everything() {
        let filter = FileTypeFilter::from_kinds(&[]);
        assert_eq!(filter, FileTypeFilter::all());
        assert!(filter.has_allowed_ext(Path::new("a.mp4")));
        assert!(filter.has_allowed_ext(Path::new("a.JPG")));
    }

    #[test]
    fn test_selection_restricts_extensions() {
        let filter = FileTypeFilter::from_kinds(&[MediaKind::Video, MediaKind::Gif]);
        assert!(filter.has_allowed_ext(Path::new("clip.MOV")));
        assert!(filter.has_allowed_ext(Path::new("loop.gif")));
        assert!(!filter.has_allowed_ext(Path::new("photo.png")));
        assert!(!filter.has_allowed_ext(Path::new("notes.txt")));
    }

    #[test]
    fn test_extension_may_appear_mid_name() {
        let filter = FileTypeFilter::from_kinds(&[MediaKind::Image]);
        assert!(filter.has_allowed_ext(Path::new("photo.png.bak")));
        // Directory names do not count
        assert!(!filter.has_allowed_ext(Path::new("shots.png/notes.txt")));
    }

    #[test]
    fn test_signature_is_order_independent() {
        let a = FileTypeFilter::from_kinds(&[MediaKind::Pdf, MediaKind::Image]);
        let b = FileTypeFilter::from_kinds(&[MediaKind::Image, MediaKind::Pdf, MediaKind::Pdf]);
        assert_eq!(a.signature(), b.signature());
    }
}
