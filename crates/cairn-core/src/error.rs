//! Error types shared by every Cairn crate.

use crate::hash::EventId;
use thiserror::Error;

/// Broad classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed event, missing parent, root or id mismatch. Never applied.
    Structural,
    /// Domain rule violation. Not applied to the projection.
    Validation,
    /// A lookup that requires presence found nothing.
    NotFound,
    /// Backing store or codec failure.
    OperationFailed,
    /// Cancellation was signalled.
    Aborted,
    /// A required capability was not supplied at construction.
    MissingDependency,
}

/// Errors that can occur anywhere in the event log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Missing parents: {0:?}")]
    MissingParents(Vec<EventId>),

    #[error("Root mismatch: expected {expected}, found {found}")]
    RootMismatch { expected: EventId, found: EventId },

    #[error("Id mismatch: claimed {claimed}, computed {computed}")]
    IdMismatch { claimed: EventId, computed: EventId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Operation aborted")]
    Aborted,

    #[error("Missing dependency: {0}")]
    MissingDependency(&'static str),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Malformed(_)
            | Error::MissingParents(_)
            | Error::RootMismatch { .. }
            | Error::IdMismatch { .. } => ErrorKind::Structural,
            Error::Validation(_) => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::OperationFailed(_) => ErrorKind::OperationFailed,
            Error::Aborted => ErrorKind::Aborted,
            Error::MissingDependency(_) => ErrorKind::MissingDependency,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Malformed(_) => "ERR_MALFORMED",
            Error::MissingParents(_) => "ERR_MISSING_PARENTS",
            Error::RootMismatch { .. } => "ERR_ROOT_MISMATCH",
            Error::IdMismatch { .. } => "ERR_ID_MISMATCH",
            Error::Validation(_) => "ERR_VALIDATION",
            Error::NotFound(_) => "ERR_NOT_FOUND",
            Error::OperationFailed(_) => "ERR_OPERATION_FAILED",
            Error::Aborted => "ERR_ABORTED",
            Error::MissingDependency(_) => "ERR_MISSING_DEPENDENCY",
        }
    }

    pub fn is_structural(&self) -> bool {
        self.kind() == ErrorKind::Structural
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Error::Validation(reason.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::OperationFailed(format!("serialization: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
