pub mod file_scanner;
pub mod filter;

pub use file_scanner::{DirectoryIssue, FileScanner, ScanResult, SCANNER_CACHE};
pub use filter::FileTypeFilter;
