//! ChaCha20-Poly1305 authenticated encryption.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

use crate::error::CryptoError;

/// AEAD nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypt `plaintext` under `key` and `nonce`, authenticating `aad`.
///
/// Returns ciphertext with the 16-byte tag appended. Encryption itself
/// cannot fail for in-memory buffers.
pub fn seal(key: &[u8; 32], nonce: &[u8; NONCE_SIZE], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .expect("invariant: ChaCha20-Poly1305 encryption of in-memory buffers cannot fail")
}

/// Decrypt and authenticate a sealed buffer.
///
/// # Errors
///
/// [`CryptoError::DecryptFailed`] when the tag does not verify, covering a
/// wrong key, a tampered ciphertext and tampered associated data alike.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [7u8; 32];
    const NONCE: [u8; NONCE_SIZE] = [3u8; NONCE_SIZE];

    #[test]
    fn seal_open_roundtrip() {
        let ct = seal(&KEY, &NONCE, b"attack at dawn", b"header");
        assert_eq!(ct.len(), b"attack at dawn".len() + TAG_SIZE);
        let pt = open(&KEY, &NONCE, &ct, b"header").unwrap();
        assert_eq!(pt, b"attack at dawn");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let mut ct = seal(&KEY, &NONCE, b"payload", b"");
        ct[0] ^= 0x01;
        assert_eq!(open(&KEY, &NONCE, &ct, b""), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_aad_fails() {
        let ct = seal(&KEY, &NONCE, b"payload", b"aad-one");
        assert_eq!(open(&KEY, &NONCE, &ct, b"aad-two"), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn wrong_key_fails() {
        let ct = seal(&KEY, &NONCE, b"payload", b"");
        let other = [8u8; 32];
        assert_eq!(open(&other, &NONCE, &ct, b""), Err(CryptoError::DecryptFailed));
    }

    #[test]
    fn empty_plaintext_is_valid() {
        let ct = seal(&KEY, &NONCE, b"", b"aad");
        assert_eq!(open(&KEY, &NONCE, &ct, b"aad").unwrap(), b"");
    }
}
