use thiserror::Error;

/// Errors produced by the cryptographic primitives.
///
/// These are deliberately coarse. A caller can act on the class of failure
/// (bad key, bad signature, failed authentication) but never on anything
/// that would leak why a particular ciphertext or key was rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// A public or private key had the wrong length or produced a degenerate
    /// shared secret (for example a low-order X25519 point).
    #[error("invalid key material")]
    InvalidKey,

    /// An Ed25519 signature did not verify.
    #[error("signature verification failed")]
    BadSignature,

    /// AEAD authentication failed: wrong key, tampered ciphertext or
    /// tampered associated data.
    #[error("decryption failed")]
    DecryptFailed,
}
