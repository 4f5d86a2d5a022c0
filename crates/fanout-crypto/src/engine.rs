//! AES-256-CBC + PKCS#7 encrypt/decrypt of a single chunk
//!
//! Padding is always appended, so ciphertext length is the plaintext length
//! rounded up to the next block boundary, plus a full block when the
//! plaintext is already aligned.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::{CipherError, BLOCK_SIZE, IV_SIZE, KEY_SIZE};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<(), CipherError> {
    if key.len() != KEY_SIZE {
        return Err(CipherError::InvalidKeyLength(key.len()));
    }
    if iv.len() != IV_SIZE {
        return Err(CipherError::InvalidIvLength(iv.len()));
    }
    Ok(())
}

/// Encrypt one chunk.
///
/// Returns `ciphertext_chunk_size(plaintext.len())` bytes.
pub fn encrypt(plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    check_key_iv(key, iv)?;
    let cipher = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt one chunk produced by [`encrypt`] with the same key and iv.
///
/// Corruption is only detected when it breaks the padding; a flipped byte
/// in an earlier block yields garbled plaintext instead of an error.
pub fn decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> Result<Vec<u8>, CipherError> {
    check_key_iv(key, iv)?;
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::InvalidCiphertextLength(ciphertext.len()));
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Integrity)
}

/// Ciphertext length of a plaintext chunk of `plain` bytes.
///
/// A decrypt job splits the ciphertext file at this size so each piece is
/// exactly one encrypted chunk. `None` when the result does not fit a `usize`.
pub fn ciphertext_chunk_size(plain: usize) -> Option<usize> {
    (plain / BLOCK_SIZE)
        .checked_add(1)?
        .checked_mul(BLOCK_SIZE)
}
