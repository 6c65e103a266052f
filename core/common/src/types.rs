//! Key material types for the legacy save cipher.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Cipher block size in bytes (64-bit block).
pub const BLOCK_SIZE: usize = 8;

/// Symmetric cipher key.
///
/// Supplied by the caller as configuration; never generated or derived
/// here. Zeroized on drop and redacted in debug output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherKey([u8; BLOCK_SIZE]);

impl CipherKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; BLOCK_SIZE]) -> Self {
        Self(key)
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKey([REDACTED])")
    }
}

/// Initialization vector for CBC chaining.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CipherIv([u8; BLOCK_SIZE]);

impl CipherIv {
    /// Create an IV from raw bytes.
    pub fn from_bytes(iv: [u8; BLOCK_SIZE]) -> Self {
        Self(iv)
    }

    /// Get the IV bytes.
    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }
}

impl fmt::Debug for CipherIv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherIv([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_debug_is_redacted() {
        let key = CipherKey::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        let shown = format!("{:?}", key);
        assert_eq!(shown, "CipherKey([REDACTED])");
        assert!(!shown.contains('1'));
    }

    #[test]
    fn test_key_serializes_as_byte_array() {
        let key = CipherKey::from_bytes([18, 54, 100, 160, 190, 148, 136, 3]);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "[18,54,100,160,190,148,136,3]");

        let back: CipherKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_iv_as_bytes() {
        let iv = CipherIv::from_bytes([82, 242, 164, 132, 119, 197, 179, 20]);
        assert_eq!(iv.as_bytes()[1], 242);
    }
}
