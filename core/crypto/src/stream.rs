//! Whole-stream encryption over blocking readers and writers.
//!
//! Data is moved one chunk at a time, so neither side has to fit in
//! memory. The async pipeline in the codec crate drives the same
//! transforms itself so it can report progress and observe cancellation.

use std::io::{Read, Write};

use tracing::debug;

use atosave_common::{CipherIv, CipherKey, Error, Result};
use crate::cipher::{DesCbcDecryptor, DesCbcEncryptor};

/// Default chunk size for streaming (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Encrypt everything from `reader` into `writer`.
///
/// # Returns
/// Number of plaintext bytes consumed.
///
/// # Errors
/// - I/O errors from reader/writer
/// - Zero chunk size
pub fn encrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &CipherKey,
    iv: &CipherIv,
    chunk_size: usize,
) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("Chunk size must be non-zero".to_string()));
    }

    let mut encryptor = DesCbcEncryptor::new(key, iv)?;
    let mut buffer = vec![0u8; chunk_size];
    let mut total_bytes = 0u64;

    loop {
        let bytes_read = read_chunk(&mut reader, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        total_bytes += bytes_read as u64;
        writer.write_all(&encryptor.update(&buffer[..bytes_read]))?;
    }

    writer.write_all(&encryptor.finish())?;
    writer.flush()?;
    debug!(bytes = total_bytes, "Encrypted stream");
    Ok(total_bytes)
}

/// Decrypt everything from `reader` into `writer`.
///
/// # Returns
/// Number of plaintext bytes produced.
///
/// # Errors
/// - I/O errors
/// - Ciphertext truncated, misaligned or badly padded
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    mut writer: W,
    key: &CipherKey,
    iv: &CipherIv,
    chunk_size: usize,
) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("Chunk size must be non-zero".to_string()));
    }

    let mut decryptor = DesCbcDecryptor::new(key, iv)?;
    let mut buffer = vec![0u8; chunk_size];
    let mut total_bytes = 0u64;

    loop {
        let bytes_read = read_chunk(&mut reader, &mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        let plaintext = decryptor.update(&buffer[..bytes_read]);
        writer.write_all(&plaintext)?;
        total_bytes += plaintext.len() as u64;
    }

    let tail = decryptor.finish()?;
    writer.write_all(&tail)?;
    writer.flush()?;
    total_bytes += tail.len() as u64;
    Ok(total_bytes)
}

/// Fill `buffer` from the reader, stopping early only at end of input.
fn read_chunk<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize> {
    let mut total_read = 0;
    while total_read < buffer.len() {
        match reader.read(&mut buffer[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total_read)
}
