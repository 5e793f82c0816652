use std::cmp::Ordering;
use std::path::Path;

use crate::media::MediaFile;

/// Ordered files of the browser.
#[derive(Debug, Clone, Default)]
pub struct FileList {
    files: Vec<MediaFile>,
}

impl FileList {
    pub fn new(files: Vec<MediaFile>) -> Self {
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File at `index`, wrapping around the end of the list.
    pub fn get(&self, index: usize) -> Option<&MediaFile> {
        if self.files.is_empty() {
            return None;
        }
        self.files.get(index % self.files.len())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut MediaFile> {
        if self.files.is_empty() {
            return None;
        }
        let len = self.files.len();
        self.files.get_mut(index % len)
    }

    /// Insert at `index`, clamped to the end of the list.
    pub fn insert(&mut self, index: usize, file: MediaFile) -> usize {
        let index = index.min(self.files.len());
        self.files.insert(index, file);
        index
    }

    pub fn remove(&mut self, index: usize) -> Option<MediaFile> {
        (index < self.files.len()).then(|| self.files.remove(index))
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.files.iter().position(|file| file == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaFile> {
        self.files.iter()
    }

    /// Stable sort; `reverse` flips the comparison.
    pub fn sort_by<F>(&mut self, reverse: bool, mut compare: F)
    where
        F: FnMut(&MediaFile, &MediaFile) -> Ordering,
    {
        if reverse {
            self.files.sort_by(|a, b| compare(b, a));
        } else {
            self.files.sort_by(|a, b| compare(a, b));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(names: &[&str]) -> FileList {
        FileList::new(names.iter().map(MediaFile::new).collect())
    }

    #[test]
    fn test_get_wraps() {
        let files = list(&["a.jpg", "b.jpg", "c.jpg"]);
        assert_eq!(files.get(3).unwrap().path(), Path::new("a.jpg"));
        assert_eq!(files.get(7).unwrap().path(), Path::new("b.jpg"));
        assert!(FileList::default().get(0).is_none());
    }

    #[test]
    fn test_insert_clamps_index() {
        let mut files = list(&["a.jpg"]);
        assert_eq!(files.insert(10, MediaFile::new("z.jpg")), 1);
        assert_eq!(files.position(Path::new("z.jpg")), Some(1));
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut files = list(&["a.jpg"]);
        assert!(files.remove(1).is_none());
        assert!(files.remove(0).is_some());
        assert!(files.is_empty());
    }

    #[test]
    fn test_sort_reverse() {
        let mut files = list(&["b.jpg", "c.jpg", "a.jpg"]);
        files.sort_by(true, |a, b| a.path().cmp(b.path()));
        let names: Vec<_> = files.iter().map(|f| f.basename()).collect();
        assert_eq!(names, vec!["c.jpg", "b.jpg", "a.jpg"]);
    }
}
