//! Error types for `SoganDB` operations.

use std::fmt;

use crate::onion::{Onion, SecLevel};

/// Main error type for `SoganDB` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Logical name clash, unknown reference, or a level-transition request
    /// against an onion the field does not carry.
    #[error("schema error: {0}")]
    Schema(String),

    /// Attempt to peel the innermost layer or rise above the outermost.
    #[error("level error: cannot move {onion:?} from {from:?} toward {to:?}")]
    Level {
        /// Onion on which the transition was requested
        onion: Onion,
        /// Level the onion currently sits at
        from: SecLevel,
        /// Level the caller asked for
        to: SecLevel,
    },

    /// Primitive precondition violation: wrong key size, wrong ciphertext
    /// length, plaintext out of range.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Persistence failure during a bookkeeping write, after retries.
    #[error("backend error: {0}")]
    Backend(#[from] StoreError),

    /// Deserialization inconsistency detected while rebuilding the schema.
    #[error("corrupt metadata: {0}")]
    Corruption(String),
}

impl Error {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub(crate) fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corruption(msg.into())
    }
}

/// Errors raised by [`MetaStore`](crate::store::MetaStore) implementations.
///
/// Kept separate from [`Error`] so store crates do not depend on the onion
/// model; the catalog wraps these as [`Error::Backend`] once retries are
/// exhausted.
#[derive(Debug)]
pub enum StoreError {
    /// The store rejected a write.
    WriteFailed(String),

    /// The store could not produce its records at load time.
    ReadFailed(String),

    /// A row addressed by id (or onion id + position) does not exist.
    RowNotFound(String),

    /// I/O operation failed.
    Io(std::io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
            Self::ReadFailed(msg) => write!(f, "read failed: {msg}"),
            Self::RowNotFound(msg) => write!(f, "row not found: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
