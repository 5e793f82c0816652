use std::fmt;

use anyhow::Result;

use super::file_manager::FileManager;

/// How alarming an action is to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Normal,
    Warning,
    Danger,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        };
        f.write_str(label)
    }
}

/// Reverts an action. A failed undo may be retried.
pub type Undo = Box<dyn FnMut(&mut FileManager) -> Result<()>>;

/// A completed file operation that can be undone.
pub struct Action {
    severity: Severity,
    description: String,
    undo: Undo,
}

impl Action {
    pub fn new<F>(severity: Severity, description: impl Into<String>, undo: F) -> Self
    where
        F: FnMut(&mut FileManager) -> Result<()> + 'static,
    {
        Self {
            severity,
            description: description.into(),
            undo: Box::new(undo),
        }
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Same undo, different wording and severity.
    pub(super) fn relabel(self, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            undo: self.undo,
        }
    }

    pub fn undo(&mut self, manager: &mut FileManager) -> Result<()> {
        (self.undo)(manager)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("severity", &self.severity)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}
