//! Protocol error types.

use thiserror::Error;

/// Errors produced while framing commands or interpreting device responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("parameter {0:?} contains a reserved character (prefix or line break)")]
    ReservedCharacter(String),

    #[error("filename too long: {len} bytes (max {max})")]
    FilenameTooLong { len: usize, max: usize },

    #[error("filename {0:?} contains a reserved character")]
    InvalidFilename(String),

    #[error("chunk of {len} bytes exceeds packet capacity of {max}")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("malformed {expected} response: {payload:?}")]
    Malformed {
        /// What the parser was looking for.
        expected: &'static str,
        /// Raw payload text, attached for diagnostics.
        payload: String,
    },
}

impl ProtocolError {
    /// Builds a parse failure carrying the raw payload.
    pub fn malformed(expected: &'static str, payload: impl Into<String>) -> Self {
        ProtocolError::Malformed {
            expected,
            payload: payload.into(),
        }
    }
}
