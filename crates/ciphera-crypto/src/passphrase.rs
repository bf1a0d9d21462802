//! Passphrase envelope for at-rest secrets.
//!
//! Identity private keys on disk are sealed under a key-encryption key
//! derived from the user's passphrase with Argon2id, then encrypted with
//! ChaCha20-Poly1305. The salt is bound into the AEAD as associated data so
//! a blob cannot be re-parented onto different KDF inputs.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    aead::{self, NONCE_SIZE},
    error::CryptoError,
};

/// Salt length for the passphrase KDF.
pub const SALT_SIZE: usize = 16;

/// Argon2id memory cost in KiB (64 MiB).
const ARGON2_MEMORY_KIB: u32 = 64 * 1024;

/// Argon2id iteration count.
const ARGON2_ITERATIONS: u32 = 4;

/// Argon2id lane count.
const ARGON2_LANES: u32 = 1;

/// Derive the key-encryption key from a passphrase and salt.
fn derive_kek(passphrase: &str, salt: &[u8; SALT_SIZE]) -> Zeroizing<[u8; 32]> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_ITERATIONS, ARGON2_LANES, Some(32))
        .expect("invariant: constant Argon2 parameters are valid");
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut kek = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, kek.as_mut())
        .expect("invariant: fixed-length Argon2 output cannot fail");
    kek
}

/// Generate a fresh random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Seal `plaintext` under a passphrase-derived key.
///
/// Returns the random nonce and the ciphertext with tag.
pub fn seal_secret(
    passphrase: &str,
    salt: &[u8; SALT_SIZE],
    plaintext: &[u8],
) -> ([u8; NONCE_SIZE], Vec<u8>) {
    let kek = derive_kek(passphrase, salt);
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = aead::seal(&kek, &nonce, plaintext, salt);
    (nonce, ciphertext)
}

/// Open a sealed secret.
///
/// # Errors
///
/// [`CryptoError::DecryptFailed`] for a wrong passphrase or a corrupted
/// blob; the two are indistinguishable by design.
pub fn open_secret(
    passphrase: &str,
    salt: &[u8; SALT_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let kek = derive_kek(passphrase, salt);
    aead::open(&kek, nonce, ciphertext, salt).map(Zeroizing::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let salt = generate_salt();
        let (nonce, ct) = seal_secret("hunter2", &salt, b"private key bytes");
        let pt = open_secret("hunter2", &salt, &nonce, &ct).unwrap();
        assert_eq!(pt.as_slice(), b"private key bytes");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let salt = generate_salt();
        let (nonce, ct) = seal_secret("hunter2", &salt, b"private key bytes");
        assert!(matches!(
            open_secret("*******", &salt, &nonce, &ct),
            Err(CryptoError::DecryptFailed)
        ));
    }

    #[test]
    fn wrong_salt_fails() {
        let salt = generate_salt();
        let (nonce, ct) = seal_secret("hunter2", &salt, b"private key bytes");
        let other = generate_salt();
        assert!(open_secret("hunter2", &other, &nonce, &ct).is_err());
    }
}
