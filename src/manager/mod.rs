//! File list management with undoable actions.

pub mod action;
pub mod file_list;
pub mod file_manager;

pub use action::{Action, Severity};
pub use file_list::FileList;
pub use file_manager::{FileManager, ListObserver, ManagerError, SortKey, SortOrder};
