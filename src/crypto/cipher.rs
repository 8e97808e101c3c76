//! Symmetric payload cipher.
//!
//! The one supported wire cipher is AES-128-CBC with PKCS#7 padding, named
//! `aes128cbc` in envelope headers. Key and IV arrive base64-encoded and are
//! decoded by the caller; this module works on raw bytes only.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Wire name of the supported cipher, compared case-insensitively.
pub const CIPHER_NAME: &str = "aes128cbc";

/// Key length in bytes.
pub const KEY_SIZE: usize = 16;

/// Initialization vector length in bytes.
pub const IV_SIZE: usize = 16;

/// Error type for cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key length: expected {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("invalid iv length: expected {IV_SIZE} bytes, got {0}")]
    InvalidIvLength(usize),

    #[error("decryption failed: bad ciphertext or padding")]
    DecryptionFailed,
}

/// Encrypt plaintext under AES-128-CBC with PKCS#7 padding.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128CbcEnc::new_from_slices(key, iv).map_err(|_| length_error(key, iv))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

/// Decrypt ciphertext under AES-128-CBC, removing PKCS#7 padding.
pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128CbcDec::new_from_slices(key, iv).map_err(|_| length_error(key, iv))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

fn length_error(key: &[u8], iv: &[u8]) -> CryptoError {
    if key.len() != KEY_SIZE {
        CryptoError::InvalidKeyLength(key.len())
    } else {
        CryptoError::InvalidIvLength(iv.len())
    }
}
