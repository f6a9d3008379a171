use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// The error kind for [`MdebugError`].
#[non_exhaustive]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MdebugErrorKind {
    /// The symbolic header magic is wrong.
    BadMagic,

    /// A table advertised by the header lies outside the image.
    BadHeader,

    /// A record index points outside its table.
    BadIndex,

    /// A record could not be decoded.
    BadRecord,

    /// The caller-installed quit check fired.
    Interrupted,
}

impl fmt::Display for MdebugErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad symbolic header magic"),
            Self::BadHeader => write!(f, "symbolic header table out of bounds"),
            Self::BadIndex => write!(f, "record index out of bounds"),
            Self::BadRecord => write!(f, "malformed ecoff record"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// An error when reading an ECOFF debug section.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct MdebugError {
    kind: MdebugErrorKind,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl MdebugError {
    /// Creates a new error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: MdebugErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`MdebugErrorKind`] for this error.
    pub fn kind(&self) -> MdebugErrorKind {
        self.kind
    }
}

impl From<MdebugErrorKind> for MdebugError {
    fn from(kind: MdebugErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<scroll::Error> for MdebugError {
    fn from(e: scroll::Error) -> Self {
        Self::new(MdebugErrorKind::BadRecord, e)
    }
}
