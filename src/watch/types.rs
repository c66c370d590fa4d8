use std::path::PathBuf;

use thiserror::Error;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

/// Watcher failures. None of them end the session.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A watch root vanished or cannot be watched
    #[error("watch root unavailable: {}", .0.display())]
    RootUnavailable(PathBuf),

    #[error("file watcher error: {0}")]
    Notify(#[from] notify::Error),
}
