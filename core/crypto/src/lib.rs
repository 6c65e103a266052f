//! Symmetric cipher layer for legacy save files.
//!
//! This module provides:
//! - DES in CBC mode with PKCS#7 padding, matching the legacy writer
//! - Stateful `update`/`finish` transforms so callers can process a file
//!   one chunk at a time
//! - Reader/writer helpers for whole-stream encryption
//!
//! # Security
//! Single DES with a fixed key is weak. It is kept only to read and write
//! files the game already produces; key management is the caller's concern.
//! Key and IV bytes are never logged.

pub mod cipher;
pub mod stream;

pub use cipher::{decrypt, encrypt, DesCbcDecryptor, DesCbcEncryptor};
pub use stream::{decrypt_stream, encrypt_stream, DEFAULT_CHUNK_SIZE};
