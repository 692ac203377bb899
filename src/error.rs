use serde::{Deserialize, Serialize};

/// Broad classification of a [`CoreError`], used by collaborators (the HTTP
/// surface, the CLI) to decide a response code without string-matching on
/// `message`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The referenced drive, job, or file does not exist.
    NotFound,
    /// The request is well-formed but the current state forbids it
    /// (output already locked, drive already assigned, job not cancellable).
    Precondition,
    /// The request itself is malformed (bad disc kind, empty label).
    Validation,
    /// An external tool or the OS refused to cooperate (makemkvcon missing,
    /// eject failed, drive probe failed).
    Dependency,
    /// Likely to succeed if retried (I/O hiccup, drive momentarily busy).
    Transient,
    /// Anything else; a bug, or state we didn't expect to reach.
    Internal,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub title: String,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, "Not found", message)
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Precondition, "Precondition failed", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, "Invalid request", message)
    }

    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, "Dependency failed", message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, "Temporary failure", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "Internal error", message)
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} - {}: {}", self.kind, self.title, self.message)
    }
}

impl std::fmt::Debug for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CoreError({:?}, {}: {})", self.kind, self.title, self.message)
    }
}

impl std::error::Error for CoreError {}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::internal(err.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
