//! Common utilities and types shared across the save codec crates.
//!
//! This module provides the error taxonomy used by every layer of the
//! pipeline and the key material types handed to the cipher.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{CipherIv, CipherKey, BLOCK_SIZE};
