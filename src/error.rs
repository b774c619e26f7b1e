//! Crate-wide error taxonomy.

use std::{error, fmt};

use crate::memory_block;
use crate::type_desc::TypeRef;

/// Every recoverable failure mode exposed at the library boundary.
#[derive(Debug, Clone)]
pub enum Error {
    /// Allocation failure.
    OutOfMemory,
    /// An unassignable `(dst, src)` pair, or a non-fixed-size type used
    /// where a fixed-size slot is required.
    Type(String),
    /// An out-of-range subscript.
    Index { index: isize, len: usize },
    /// An invalid date/ymd, invalid encoding codepoint, or empty format string.
    Value(String),
    /// A numeric conversion exceeded the target range under a mode that
    /// rejects it.
    Overflow,
    /// A lossy float conversion occurred under `ErrorMode::Inexact`.
    Inexact,
    /// Comparison was requested across two kinds with no lossless
    /// bidirectional promotion between them.
    NotComparable,
    /// An illegal call sequence: resizing memory that is not the most
    /// recent allocation, assigning into an already-initialized metadata
    /// slot, and similar invariant violations.
    Misuse(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::Type(msg) => write!(f, "type error: {msg}"),
            Self::Index { index, len } => {
                write!(f, "index {index} out of range for length {len}")
            }
            Self::Value(msg) => write!(f, "value error: {msg}"),
            Self::Overflow => f.write_str("numeric conversion overflowed"),
            Self::Inexact => f.write_str("lossy conversion rejected under inexact mode"),
            Self::NotComparable => f.write_str("types are not comparable"),
            Self::Misuse(reason) => write!(f, "misuse: {reason}"),
        }
    }
}

impl error::Error for Error {}

impl From<memory_block::Error> for Error {
    fn from(err: memory_block::Error) -> Self {
        match err {
            memory_block::Error::OutOfMemory => Self::OutOfMemory,
            memory_block::Error::Misuse(reason) => Self::Misuse(reason),
        }
    }
}

pub(crate) fn unassignable(dst: &TypeRef, src: &TypeRef) -> Error {
    Error::Type(format!("cannot assign {src:?} to {dst:?}"))
}

pub type Result<T> = std::result::Result<T, Error>;
