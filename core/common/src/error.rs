//! Common error types for the save codec.

use thiserror::Error;

/// Top-level error type for save codec operations.
///
/// Cancellation is not an error: a cancelled load or save ends with
/// `Outcome::Cancelled` instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Decryption or encryption failed (bad padding, truncated ciphertext,
    /// wrong key).
    #[error("Cipher error: {0}")]
    Cipher(String),

    /// The decrypted buffer is not a well-formed binary object graph.
    #[error("Malformed graph at byte {offset}: {reason}")]
    MalformedGraph {
        /// Offset into the cleartext buffer where decoding stopped.
        offset: u64,
        /// What was wrong.
        reason: String,
    },

    /// The graph uses a feature of the legacy format this codec rejects.
    #[error("Unsupported graph feature: {0}")]
    UnsupportedGraphFeature(String),

    /// Static configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The decoded graph could not be mapped to a save document.
    #[error("Document error: {0}")]
    Document(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Build a malformed-graph error at the given offset.
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedGraph {
            offset: offset as u64,
            reason: reason.into(),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
