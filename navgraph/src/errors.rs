use thiserror::Error;

/// Failures reported by the accessibility engine that drives the live UI.
#[derive(Error, Debug, Clone)]
pub enum AutomationError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Element is detached from the current window: {0}")]
    ElementDetached(String),

    #[error("Failed to scroll element: {0}")]
    ScrollFailed(String),
}

/// Which kind of row a storage write refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Session,
    Screen,
    Element,
    Edge,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordKind::Session => "session",
            RecordKind::Screen => "screen",
            RecordKind::Element => "element",
            RecordKind::Edge => "edge",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// The backing store cannot be reached at all. Exploration aborts on this.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A write referenced a parent row that does not exist yet.
    #[error("Rejected write: missing parent {kind} {hash}")]
    MissingParent { kind: RecordKind, hash: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Fatal errors end the session; everything else is logged and skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ExplorerError {
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("An exploration is already running for application {0}")]
    AlreadyExploring(String),

    #[error("Exploration session not found: {0}")]
    SessionNotFound(String),

    #[error("Session {0} is not paused and cannot be resumed")]
    NotResumable(String),

    #[error("Invalid exploration config: {0}")]
    InvalidConfig(String),
}
