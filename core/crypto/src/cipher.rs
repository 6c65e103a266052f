//! DES-CBC with PKCS#7 padding as a chunked transform.
//!
//! CBC chaining makes every block depend on the one before it, so a
//! transform must see the chunks of a file strictly in order.

use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroize;

use atosave_common::{CipherIv, CipherKey, Error, Result, BLOCK_SIZE};

type DesCbcEnc = cbc::Encryptor<des::Des>;
type DesCbcDec = cbc::Decryptor<des::Des>;

/// Streaming encryptor.
///
/// Bytes that do not yet fill a block are buffered until the next
/// `update` or until `finish` pads them.
pub struct DesCbcEncryptor {
    cipher: DesCbcEnc,
    pending: Vec<u8>,
}

impl DesCbcEncryptor {
    /// Create an encryptor for the given key and IV.
    pub fn new(key: &CipherKey, iv: &CipherIv) -> Result<Self> {
        let cipher = DesCbcEnc::new_from_slices(key.as_bytes(), iv.as_bytes())
            .map_err(|e| Error::Cipher(format!("Invalid key or IV: {}", e)))?;
        Ok(Self {
            cipher,
            pending: Vec::with_capacity(BLOCK_SIZE),
        })
    }

    /// Encrypt as many whole blocks as are available.
    ///
    /// # Postconditions
    /// - Returns a multiple of BLOCK_SIZE bytes (possibly empty)
    /// - At most BLOCK_SIZE - 1 bytes remain buffered
    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        let ready = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Pad and encrypt the buffered tail.
    ///
    /// Always emits exactly one block: a full padding block when the
    /// plaintext length was already block-aligned.
    pub fn finish(mut self) -> Vec<u8> {
        let pad = BLOCK_SIZE - self.pending.len();
        let mut block = std::mem::take(&mut self.pending);
        block.resize(BLOCK_SIZE, pad as u8);
        self.cipher
            .encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        block
    }
}

/// Streaming decryptor.
///
/// The last complete block is always held back so that `finish` can
/// validate and strip the padding.
pub struct DesCbcDecryptor {
    cipher: DesCbcDec,
    pending: Vec<u8>,
}

impl DesCbcDecryptor {
    /// Create a decryptor for the given key and IV.
    pub fn new(key: &CipherKey, iv: &CipherIv) -> Result<Self> {
        let cipher = DesCbcDec::new_from_slices(key.as_bytes(), iv.as_bytes())
            .map_err(|e| Error::Cipher(format!("Invalid key or IV: {}", e)))?;
        Ok(Self {
            cipher,
            pending: Vec::with_capacity(BLOCK_SIZE * 2),
        })
    }

    /// Decrypt every available block except the last one.
    pub fn update(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() <= BLOCK_SIZE {
            return Vec::new();
        }
        let ready = (self.pending.len() - 1) / BLOCK_SIZE * BLOCK_SIZE;
        let mut out: Vec<u8> = self.pending.drain(..ready).collect();
        for block in out.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher
                .decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Decrypt the final block and strip its padding.
    ///
    /// # Errors
    /// - Total ciphertext was empty or not a multiple of BLOCK_SIZE
    /// - Padding is invalid (corrupt file or wrong key)
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.pending.is_empty() {
            return Err(Error::Cipher("Ciphertext is empty".to_string()));
        }
        if self.pending.len() != BLOCK_SIZE {
            return Err(Error::Cipher(
                "Ciphertext length is not a multiple of the block size".to_string(),
            ));
        }

        let mut block = std::mem::take(&mut self.pending);
        self.cipher
            .decrypt_block_mut(GenericArray::from_mut_slice(&mut block));

        let pad = block[BLOCK_SIZE - 1] as usize;
        let valid = (1..=BLOCK_SIZE).contains(&pad)
            && block[BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad);
        if !valid {
            block.zeroize();
            return Err(Error::Cipher("Invalid padding".to_string()));
        }

        block.truncate(BLOCK_SIZE - pad);
        Ok(block)
    }
}

/// Encrypt a complete buffer.
pub fn encrypt(plaintext: &[u8], key: &CipherKey, iv: &CipherIv) -> Result<Vec<u8>> {
    let mut encryptor = DesCbcEncryptor::new(key, iv)?;
    let mut out = encryptor.update(plaintext);
    out.extend(encryptor.finish());
    Ok(out)
}

/// Decrypt a complete buffer.
pub fn decrypt(ciphertext: &[u8], key: &CipherKey, iv: &CipherIv) -> Result<Vec<u8>> {
    let mut decryptor = DesCbcDecryptor::new(key, iv)?;
    let mut out = decryptor.update(ciphertext);
    out.extend(decryptor.finish()?);
    Ok(out)
}
