//! Cursor over the browsed files and the reversible operations on them.
//!
//! Every mutating operation returns an [`Action`] whose undo closure
//! captures the state it needs to put things back. While the list is
//! non-empty the current index is always in range.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use thiserror::Error;
use tracing::{debug, info};

use super::action::{Action, Severity};
use super::file_list::FileList;
use crate::cache::Invalidate;
use crate::media::file::{absolute_dir, safe_candidate, same_file};
use crate::media::MediaFile;
use crate::scanner::SCANNER_CACHE;
use crate::trash::Trash;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("No files in the list")]
    EmptyList,
    #[error("'{}' is not in the list", .0.display())]
    NotInList(PathBuf),
    #[error("'{}' is already in '{}'", .0.display(), .1.display())]
    SameLocation(PathBuf, PathBuf),
}

/// Receives list changes, e.g. to refresh a view.
pub trait ListObserver {
    /// The list or the current index changed.
    fn on_list_modified(&self);
    /// The last file was removed.
    fn on_list_empty(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOrder {
    pub key: SortKey,
    pub reverse: bool,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self.key {
            SortKey::Name => "name",
            SortKey::Date => "date",
        };
        if self.reverse {
            write!(f, "{} (reversed)", key)
        } else {
            f.write_str(key)
        }
    }
}

pub struct FileManager {
    list: FileList,
    index: usize,
    order: SortOrder,
    trash: Box<dyn Trash>,
    observer: Option<Box<dyn ListObserver>>,
}

impl FileManager {
    pub fn new(trash: Box<dyn Trash>) -> Self {
        Self {
            list: FileList::default(),
            index: 0,
            order: SortOrder::default(),
            trash,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn ListObserver>) {
        self.observer = Some(observer);
    }

    /// Replace the list, sorted with the current order, selecting `start`
    /// when it is part of it.
    pub fn set_files(&mut self, paths: impl IntoIterator<Item = PathBuf>, start: Option<&Path>) {
        self.list = FileList::new(paths.into_iter().map(MediaFile::new).collect());
        self.apply_order();
        self.index = start.and_then(|p| self.list.position(p)).unwrap_or(0);

        info!(files = self.list.len(), index = self.index, "Loaded file list");
        self.notify();
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn files(&self) -> &FileList {
        &self.list
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    pub fn current(&self) -> Result<&MediaFile> {
        Ok(self.list.get(self.index).ok_or(ManagerError::EmptyList)?)
    }

    pub fn current_mut(&mut self) -> Result<&mut MediaFile> {
        Ok(self.list.get_mut(self.index).ok_or(ManagerError::EmptyList)?)
    }

    /// File after the current one, wrapping around.
    pub fn next(&self) -> Option<&MediaFile> {
        self.list.get(self.index + 1)
    }

    /// File before the current one, wrapping around.
    pub fn prev(&self) -> Option<&MediaFile> {
        let len = self.list.len();
        if len == 0 {
            return None;
        }
        self.list.get(self.index + len - 1)
    }

    pub fn go_first(&mut self) {
        self.select(0);
    }

    pub fn go_last(&mut self) {
        self.select(self.list.len().saturating_sub(1));
    }

    pub fn go_forward(&mut self, steps: usize) {
        let len = self.list.len().max(1);
        self.select((self.index + steps % len) % len);
    }

    pub fn go_backward(&mut self, steps: usize) {
        let len = self.list.len().max(1);
        self.select((self.index + len - steps % len) % len);
    }

    pub fn go_file(&mut self, path: &Path) -> Result<()> {
        let index = self
            .list
            .position(path)
            .ok_or_else(|| ManagerError::NotInList(path.to_path_buf()))?;
        self.select(index);
        Ok(())
    }

    fn select(&mut self, index: usize) {
        if self.list.is_empty() {
            return;
        }
        self.index = index;
        self.notify();
    }

    pub fn sort_by_name(&mut self, reverse: bool) {
        self.sort(SortOrder {
            key: SortKey::Name,
            reverse,
        });
    }

    pub fn sort_by_date(&mut self, reverse: bool) {
        self.sort(SortOrder {
            key: SortKey::Date,
            reverse,
        });
    }

    /// Re-sort the list keeping the current file selected.
    pub fn sort(&mut self, order: SortOrder) {
        self.order = order;
        let current = self.current().ok().map(|f| f.path().to_path_buf());
        self.apply_order();
        if let Some(index) = current.and_then(|p| self.list.position(&p)) {
            self.index = index;
        }
        debug!(%order, "Sorted file list");
        self.notify();
    }

    fn apply_order(&mut self) {
        let SortOrder { key, reverse } = self.order;
        match key {
            SortKey::Name => self.list.sort_by(reverse, |a, b| a.path().cmp(b.path())),
            SortKey::Date => self.list.sort_by(reverse, |a, b| {
                let a_time = a.modified().ok();
                let b_time = b.modified().ok();
                a_time.cmp(&b_time).then_with(|| a.path().cmp(b.path()))
            }),
        }
    }

    /// Rename the current file to `new_path`.
    ///
    /// Within the same directory the entry stays in the list; otherwise it
    /// leaves the list.
    pub fn rename_current(&mut self, new_path: &Path) -> Result<Action> {
        let old_path = self.current()?.path().to_path_buf();
        let description = format!(
            "'{}' renamed to '{}'",
            old_path.display(),
            new_path.display()
        );
        self.relocate_current(new_path, Severity::Normal, description)
    }

    /// Move the current file into `target_dir`, optionally renaming it.
    ///
    /// When the target name is taken, an identical file means the current
    /// one is a duplicate and gets deleted; a different file makes the
    /// current one move under the first free `name (n).ext`.
    pub fn move_current(&mut self, target_dir: &Path, name: Option<&str>) -> Result<Action> {
        if !target_dir.is_dir() {
            bail!("'{}' is not a directory", target_dir.display());
        }

        let current = self.current()?;
        let old_path = current.path().to_path_buf();
        let name = name.map(str::to_string).unwrap_or_else(|| current.basename());

        let target = target_dir.join(&name);
        let same_dir =
            absolute_dir(target_dir) == absolute_dir(current.dirname()) && name == current.basename();
        if same_dir || same_file(&target, &old_path) {
            return Err(ManagerError::SameLocation(old_path, target_dir.to_path_buf()).into());
        }

        if !target.exists() {
            let description = format!(
                "'{}' moved to '{}'",
                old_path.display(),
                target_dir.display()
            );
            return self.relocate_current(&target, Severity::Normal, description);
        }

        if MediaFile::new(&target).digest()? == current.digest()? {
            let description = format!("'{}' deleted to avoid duplicates", old_path.display());
            info!(path = ?old_path, existing = ?target, "Duplicate found");
            return self.delete_current().map(|a| a.relabel(Severity::Danger, description));
        }

        let candidate = safe_candidate(target_dir, &name);
        let description = format!(
            "'{}' auto-renamed to '{}' in '{}'",
            old_path.display(),
            candidate,
            target_dir.display()
        );
        self.relocate_current(&target_dir.join(candidate), Severity::Warning, description)
    }

    fn relocate_current(
        &mut self,
        new_path: &Path,
        severity: Severity,
        description: String,
    ) -> Result<Action> {
        let index = self.index;
        let file = self.current_mut()?;
        let old_path = file.path().to_path_buf();
        let old_dir = file.dirname().to_path_buf();

        file.rename(new_path)?;
        let new_dir = file.dirname().to_path_buf();
        invalidate_dirs(&[&old_dir, &new_dir]);
        info!(from = ?old_path, to = ?new_path, "{}", description);

        let new_path = new_path.to_path_buf();
        if absolute_dir(&old_dir) == absolute_dir(&new_dir) {
            self.notify();
            return Ok(Action::new(severity, description, move |manager| {
                manager.go_file(&new_path)?;
                manager.current_mut()?.rename(&old_path)?;
                invalidate_dirs(&[&old_dir]);
                manager.notify();
                Ok(())
            }));
        }

        let file = self.eliminate_current()?;
        Ok(Action::new(severity, description, move |manager| {
            let mut file = file.clone();
            file.rename(&old_path)?;
            invalidate_dirs(&[&old_dir, &new_dir]);
            manager.restore(file, index);
            Ok(())
        }))
    }

    /// Send the current file to the trash.
    pub fn delete_current(&mut self) -> Result<Action> {
        let index = self.index;
        let path = self.current()?.path().to_path_buf();

        self.trash.trash(&path)?;
        let file = self.eliminate_current()?;
        let dir = file.dirname().to_path_buf();
        invalidate_dirs(&[&dir]);

        let description = format!("'{}' deleted", path.display());
        Ok(Action::new(Severity::Danger, description, move |manager| {
            manager.trash.restore(file.path())?;
            invalidate_dirs(&[&dir]);
            manager.restore(file.clone(), index);
            Ok(())
        }))
    }

    /// Star or unstar the current file.
    pub fn toggle_star(&mut self) -> Result<Action> {
        let file = self.current_mut()?;
        let name = file.basename();
        let starred = !file.is_starred();

        file.set_starred(starred)?;
        let new_path = file.path().to_path_buf();
        let dir = file.dirname().to_path_buf();
        invalidate_dirs(&[&dir]);
        self.notify();

        let verb = if starred { "starred" } else { "unstarred" };
        Ok(Action::new(
            Severity::Normal,
            format!("'{}' {}", name, verb),
            move |manager| {
                manager.go_file(&new_path)?;
                manager.current_mut()?.set_starred(!starred)?;
                invalidate_dirs(&[&dir]);
                manager.notify();
                Ok(())
            },
        ))
    }

    /// Take the current file out of the list.
    fn eliminate_current(&mut self) -> Result<MediaFile> {
        let file = self.list.remove(self.index).ok_or(ManagerError::EmptyList)?;
        if self.index >= self.list.len() {
            self.index = 0;
        }
        debug!(path = ?file.path(), remaining = self.list.len(), "Removed from list");
        self.notify();
        Ok(file)
    }

    /// Put a file back at `index` (clamped) and select it.
    fn restore(&mut self, file: MediaFile, index: usize) {
        self.index = self.list.insert(index, file);
        self.notify();
    }

    fn notify(&self) {
        let Some(observer) = &self.observer else {
            return;
        };
        if self.list.is_empty() {
            observer.on_list_empty();
        } else {
            observer.on_list_modified();
        }
    }
}

/// Drop cached listings (and what chains to them) for `dirs`.
fn invalidate_dirs(dirs: &[&Path]) {
    for dir in dirs {
        SCANNER_CACHE.invalidate(&absolute_dir(dir).display().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::FileScanner;
    use crate::trash::TrashDir;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::{tempdir, TempDir};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Modified,
        Empty,
    }

    struct Recorder(Rc<RefCell<Vec<Event>>>);

    impl ListObserver for Recorder {
        fn on_list_modified(&self) {
            self.0.borrow_mut().push(Event::Modified);
        }

        fn on_list_empty(&self) {
            self.0.borrow_mut().push(Event::Empty);
        }
    }

    struct Fixture {
        dir: TempDir,
        manager: FileManager,
        events: Rc<RefCell<Vec<Event>>>,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Self {
            let dir = tempdir().unwrap();
            let src = dir.path().join("src");
            fs::create_dir(&src).unwrap();
            for name in names {
                fs::write(src.join(name), name.as_bytes()).unwrap();
            }

            let trash = TrashDir::new(dir.path().join("Trash"));
            let mut manager = FileManager::new(Box::new(trash));
            let events = Rc::new(RefCell::new(Vec::new()));
            manager.set_observer(Box::new(Recorder(events.clone())));
            manager.set_files(names.iter().map(|n| src.join(n)), None);

            Self {
                dir,
                manager,
                events,
            }
        }

        fn src(&self, name: &str) -> PathBuf {
            self.dir.path().join("src").join(name)
        }

        fn target(&self) -> PathBuf {
            let target = self.dir.path().join("target");
            fs::create_dir_all(&target).unwrap();
            target
        }

        fn current_name(&self) -> String {
            self.manager.current().unwrap().basename()
        }
    }

    #[test]
    fn test_navigation_wraps() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg", "c.jpg"]);
        let m = &mut fx.manager;

        m.go_backward(1);
        assert_eq!(m.index(), 2);
        m.go_forward(2);
        assert_eq!(m.index(), 1);
        m.go_forward(7);
        assert_eq!(m.index(), 2);
        assert_eq!(m.next().unwrap().basename(), "a.jpg");
        assert_eq!(m.prev().unwrap().basename(), "b.jpg");

        m.go_first();
        assert_eq!(m.index(), 0);
        m.go_last();
        assert_eq!(m.index(), 2);
    }

    #[test]
    fn test_set_files_selects_start() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        let start = fx.src("b.jpg");
        let files = vec![fx.src("a.jpg"), start.clone()];
        fx.manager.set_files(files, Some(&start));
        assert_eq!(fx.current_name(), "b.jpg");
    }

    #[test]
    fn test_go_file_missing() {
        let mut fx = Fixture::new(&["a.jpg"]);
        let err = fx.manager.go_file(Path::new("nope.jpg")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManagerError>(),
            Some(ManagerError::NotInList(_))
        ));
    }

    #[test]
    fn test_sort_keeps_current_selected() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg", "c.jpg"]);
        let b = fx.src("b.jpg");
        fx.manager.go_file(&b).unwrap();

        fx.manager.sort_by_name(true);
        assert_eq!(fx.manager.files().get(0).unwrap().basename(), "c.jpg");
        assert_eq!(fx.current_name(), "b.jpg");
        assert_eq!(fx.manager.sort_order().to_string(), "name (reversed)");
    }

    #[test]
    fn test_rename_in_place_and_undo() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        let new_path = fx.src("renamed.jpg");

        let mut action = fx.manager.rename_current(&new_path).unwrap();
        assert_eq!(action.severity(), Severity::Normal);
        assert!(action.description().contains("renamed to"));
        assert_eq!(fx.manager.len(), 2);
        assert_eq!(fx.current_name(), "renamed.jpg");
        assert!(new_path.exists());

        fx.manager.go_last();
        action.undo(&mut fx.manager).unwrap();
        assert_eq!(fx.current_name(), "a.jpg");
        assert!(fx.src("a.jpg").exists());
        assert!(!new_path.exists());
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        let b = fx.src("b.jpg");
        let err = fx.manager.rename_current(&b).unwrap_err();
        assert!(err.to_string().ends_with("already exists!"));
        assert!(fx.src("a.jpg").exists());
    }

    #[test]
    fn test_move_and_undo_restores_index() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg", "c.jpg"]);
        let target = fx.target();
        let b = fx.src("b.jpg");
        fx.manager.go_file(&b).unwrap();

        let mut action = fx.manager.move_current(&target, None).unwrap();
        assert_eq!(action.severity(), Severity::Normal);
        assert!(action.description().contains("moved to"));
        assert!(target.join("b.jpg").exists());
        assert_eq!(fx.manager.len(), 2);
        assert_eq!(fx.current_name(), "c.jpg");

        action.undo(&mut fx.manager).unwrap();
        assert_eq!(fx.manager.len(), 3);
        assert_eq!(fx.manager.index(), 1);
        assert_eq!(fx.current_name(), "b.jpg");
        assert!(fx.src("b.jpg").exists());
    }

    #[test]
    fn test_move_last_file_empties_list() {
        let mut fx = Fixture::new(&["only.jpg"]);
        let target = fx.target();

        fx.manager.move_current(&target, None).unwrap();
        assert!(fx.manager.is_empty());
        assert_eq!(fx.events.borrow().last(), Some(&Event::Empty));
        assert!(matches!(
            fx.manager.current().unwrap_err().downcast_ref::<ManagerError>(),
            Some(ManagerError::EmptyList)
        ));
    }

    #[test]
    fn test_move_duplicate_deletes_current() {
        let mut fx = Fixture::new(&["dup.jpg", "other.jpg"]);
        let target = fx.target();
        fs::write(target.join("dup.jpg"), b"dup.jpg").unwrap();

        let mut action = fx.manager.move_current(&target, None).unwrap();
        assert_eq!(action.severity(), Severity::Danger);
        assert!(action.description().ends_with("deleted to avoid duplicates"));
        assert!(!fx.src("dup.jpg").exists());
        assert_eq!(fx.manager.len(), 1);

        action.undo(&mut fx.manager).unwrap();
        assert!(fx.src("dup.jpg").exists());
        assert_eq!(fx.current_name(), "dup.jpg");
    }

    #[test]
    fn test_move_clash_auto_renames() {
        let mut fx = Fixture::new(&["clash.jpg"]);
        let target = fx.target();
        fs::write(target.join("clash.jpg"), b"something else").unwrap();
        fs::write(target.join("clash (1).jpg"), b"and another").unwrap();

        let action = fx.manager.move_current(&target, None).unwrap();
        assert_eq!(action.severity(), Severity::Warning);
        assert!(action.description().contains("auto-renamed to 'clash (2).jpg'"));
        assert!(target.join("clash (2).jpg").exists());
        assert_eq!(fs::read(target.join("clash.jpg")).unwrap(), b"something else");
    }

    #[test]
    fn test_auto_rename_undo_restores_index() {
        let mut fx = Fixture::new(&["a.jpg", "clash.jpg", "z.jpg"]);
        let target = fx.target();
        fs::write(target.join("clash.jpg"), b"something else").unwrap();
        let clash = fx.src("clash.jpg");
        fx.manager.go_file(&clash).unwrap();

        let mut action = fx.manager.move_current(&target, None).unwrap();
        assert_eq!(action.severity(), Severity::Warning);
        assert!(!clash.exists());
        assert_eq!(fx.current_name(), "z.jpg");

        action.undo(&mut fx.manager).unwrap();
        assert_eq!(fx.manager.len(), 3);
        assert_eq!(fx.manager.index(), 1);
        assert_eq!(fx.current_name(), "clash.jpg");
        assert_eq!(fs::read(&clash).unwrap(), b"clash.jpg");
        assert!(!target.join("clash (1).jpg").exists());
        assert_eq!(fs::read(target.join("clash.jpg")).unwrap(), b"something else");
    }

    #[test]
    fn test_move_into_own_directory_is_refused() {
        let mut fx = Fixture::new(&["a.jpg"]);
        let src = fx.dir.path().join("src");
        let err = fx.manager.move_current(&src, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManagerError>(),
            Some(ManagerError::SameLocation(..))
        ));
        assert!(fx.src("a.jpg").exists());
    }

    #[test]
    fn test_move_through_parent_path_is_refused() {
        let mut fx = Fixture::new(&["a.jpg"]);
        let detour = fx.dir.path().join("src").join("..").join("src").join("a.jpg");
        fx.manager.set_files(vec![detour], None);
        let canonical_src = fs::canonicalize(fx.dir.path().join("src")).unwrap();

        let err = fx.manager.move_current(&canonical_src, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManagerError>(),
            Some(ManagerError::SameLocation(..))
        ));
        assert!(fx.src("a.jpg").exists());
        assert_eq!(fx.manager.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_move_through_symlinked_dir_is_refused() {
        let mut fx = Fixture::new(&["a.jpg"]);
        let link = fx.dir.path().join("link");
        std::os::unix::fs::symlink(fx.dir.path().join("src"), &link).unwrap();
        fx.manager.set_files(vec![link.join("a.jpg")], None);

        let err = fx.manager.move_current(&fx.dir.path().join("src"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ManagerError>(),
            Some(ManagerError::SameLocation(..))
        ));
        assert!(fx.src("a.jpg").exists());
    }

    #[test]
    fn test_failed_undo_can_be_retried() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        let mut action = fx.manager.delete_current().unwrap();

        // Something else took the name in the meantime
        fs::write(fx.src("a.jpg"), b"intruder").unwrap();
        assert!(action.undo(&mut fx.manager).is_err());
        assert_eq!(fx.manager.len(), 1);

        fs::remove_file(fx.src("a.jpg")).unwrap();
        action.undo(&mut fx.manager).unwrap();
        assert_eq!(fx.manager.len(), 2);
        assert_eq!(fx.current_name(), "a.jpg");
        assert_eq!(fs::read(fx.src("a.jpg")).unwrap(), b"a.jpg");
    }

    #[test]
    fn test_delete_and_undo() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        fx.manager.go_last();

        let mut action = fx.manager.delete_current().unwrap();
        assert_eq!(action.severity(), Severity::Danger);
        assert!(!fx.src("b.jpg").exists());
        // Removing the last entry wraps to the start
        assert_eq!(fx.manager.index(), 0);

        action.undo(&mut fx.manager).unwrap();
        assert!(fx.src("b.jpg").exists());
        assert_eq!(fx.manager.index(), 1);
        assert_eq!(fx.current_name(), "b.jpg");
    }

    #[test]
    fn test_toggle_star_and_undo() {
        let mut fx = Fixture::new(&["cat.png"]);

        let mut action = fx.manager.toggle_star().unwrap();
        assert_eq!(action.description(), "'cat.png' starred");
        assert_eq!(fx.current_name(), "cat (S).png");

        action.undo(&mut fx.manager).unwrap();
        assert_eq!(fx.current_name(), "cat.png");
        assert!(fx.src("cat.png").exists());
    }

    #[test]
    fn test_mutations_invalidate_listing() {
        let mut fx = Fixture::new(&["a.jpg", "b.jpg"]);
        let scanner = FileScanner::default();
        let src = fx.dir.path().join("src");
        assert_eq!(scanner.files_from_dir(&src).unwrap().len(), 2);

        let target = fx.target();
        fx.manager.move_current(&target, None).unwrap();
        assert_eq!(scanner.files_from_dir(&src).unwrap().len(), 1);
        assert_eq!(scanner.files_from_dir(&target).unwrap().len(), 1);
    }
}
