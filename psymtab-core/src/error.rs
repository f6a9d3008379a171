use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// The error kind for [`Error`].
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller-installed quit check fired and the operation was
    /// abandoned.
    Interrupted,

    /// A reader failed while expanding a partial symtab.
    Expansion,

    /// A psymtab violated a structural expectation during a query.
    BadPsymtab,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => write!(f, "interrupted"),
            Self::Expansion => write!(f, "failed to expand partial symtab"),
            Self::BadPsymtab => write!(f, "malformed partial symtab"),
        }
    }
}

/// An error from the psymtab core.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    kind: ErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl Error {
    /// Creates a new error from a known kind as well as an arbitrary
    /// error payload.
    pub fn new<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }
}
