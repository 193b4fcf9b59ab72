//! Error types for map operations.

use std::fmt;

use crate::node::KEY_LEN;

// ============================================================================
//  Error
// ============================================================================

/// Errors that can occur during map operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The supplied key is not exactly [`KEY_LEN`] bytes long.
    KeyLength {
        /// Length of the rejected key.
        len: usize,
    },

    /// The supplied value is `0`, which encodes absence in the value word
    /// and can never be stored.
    ReservedValue,

    /// Block allocation failed: either the configured block cap is reached or
    /// the system allocator returned null.
    ArenaExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyLength { len } => {
                write!(f, "key must be exactly {KEY_LEN} bytes, got {len}")
            }

            Self::ReservedValue => {
                write!(f, "value 0 is reserved (encodes absence)")
            }

            Self::ArenaExhausted => {
                write!(f, "block allocation failed")
            }
        }
    }
}

impl std::error::Error for Error {}
