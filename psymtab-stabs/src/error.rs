use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// The error kind for [`StabsError`].
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StabsErrorKind {
    /// The symbol section does not divide into whole records.
    Truncated,

    /// A record could not be decoded.
    BadRecord,

    /// A relative string-table shift moved the base backwards.
    StringTableBackup,

    /// The caller-installed quit check fired.
    Interrupted,
}

impl fmt::Display for StabsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated stabs section"),
            Self::BadRecord => write!(f, "malformed stab record"),
            Self::StringTableBackup => write!(f, "string table offset backs up"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// An error when reading a stabs stream.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct StabsError {
    kind: StabsErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl StabsError {
    /// Creates a new error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: StabsErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`StabsErrorKind`] for this error.
    pub fn kind(&self) -> StabsErrorKind {
        self.kind
    }
}

impl From<StabsErrorKind> for StabsError {
    fn from(kind: StabsErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<scroll::Error> for StabsError {
    fn from(e: scroll::Error) -> Self {
        Self::new(StabsErrorKind::BadRecord, e)
    }
}
