//! The single value representation flowing through layer stacks.
//!
//! Integer onions carry `u64` cells; text and binary onions carry byte
//! strings. A layer's output representation is fixed by its scheme, so a
//! representation mismatch at a layer boundary means the caller wired the
//! wrong onion or level — a fatal schema inconsistency, not a data error.

use crate::error::Error;

/// One cell value, plaintext or ciphertext depending on where in the stack
/// it sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// 64-bit integer cell.
    Int(u64),
    /// Byte-string cell.
    Bytes(Vec<u8>),
}

impl Value {
    /// Borrows the integer, failing on representation mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the value is a byte string.
    pub fn as_int(&self) -> Result<u64, Error> {
        match self {
            Self::Int(v) => Ok(*v),
            Self::Bytes(_) => Err(Error::crypto("expected integer cell, got bytes")),
        }
    }

    /// Borrows the byte string, failing on representation mismatch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] if the value is an integer.
    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::Int(_) => Err(Error::crypto("expected byte cell, got integer")),
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Int(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Bytes(v.as_bytes().to_vec())
    }
}
