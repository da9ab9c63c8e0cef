//! Leaf-level error taxonomy.
//!
//! Kept no_std-friendly: `Display` is implemented by hand (as in the teacher's
//! `CoreError`) and `std::error::Error` is only wired up behind the `std` feature.

use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::string::String;

/// Result alias used throughout `graphwire-core`.
pub type CoreResult<T> = core::result::Result<T, CoreError>;

/// Errors surfaced by the LEB128 codec, the endianness helper, the payload-tag
/// alphabet, and the restricted stream view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoreError {
    /// Fewer bytes available than required to decode the current value.
    UnexpectedEndOfStream {
        /// Bytes still needed when the input ran out.
        needed: usize,
    },
    /// A byte was read where a payload tag was expected, but it matches no
    /// known member of the tag alphabet.
    InvalidTag {
        /// The raw byte that failed to resolve to a tag.
        raw: u8,
    },
    /// A LEB128/SLEB128 integer did not terminate within the maximum byte
    /// count for its declared width.
    Leb128Overflow {
        /// Maximum number of bytes allowed for this integer width.
        max_bytes: u8,
    },
    /// Decoded string bytes are not valid UTF-8.
    InvalidUtf8,
    /// `write`/`flush`/`set_length` invoked on a read-only restricted stream
    /// view, or a seek that the view's contract does not permit.
    NotSupported {
        /// Short description of the unsupported operation.
        reason: &'static str,
    },
    /// Any operation performed on a restricted stream view after it has been
    /// dropped/closed.
    Closed,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::UnexpectedEndOfStream { needed } => {
                write!(f, "unexpected end of stream: {needed} more byte(s) needed")
            }
            CoreError::InvalidTag { raw } => write!(f, "invalid payload tag: 0x{raw:02X}"),
            CoreError::Leb128Overflow { max_bytes } => {
                write!(f, "leb128 integer exceeds {max_bytes} byte(s) without terminating")
            }
            CoreError::InvalidUtf8 => write!(f, "invalid utf-8 in string payload"),
            CoreError::NotSupported { reason } => write!(f, "not supported: {reason}"),
            CoreError::Closed => write!(f, "operation on a closed stream view"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}
