use ciphera_crypto::CryptoError;
use thiserror::Error;

/// Errors from X3DH session establishment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum X3dhError {
    /// The bundle's signed pre-key signature did not verify against its
    /// signing key. The bundle is forged or corrupted; do not proceed.
    #[error("signed pre-key signature verification failed")]
    BadSignedPreKey,

    /// A Diffie-Hellman computation rejected its inputs.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors from the Double Ratchet.
///
/// None of these mutate ratchet state: a failed operation leaves the state
/// exactly as it was, so the caller can keep using it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// The header's ratchet public key was not 32 bytes.
    #[error("malformed ratchet header")]
    InvalidHeader,

    /// The chain key needed for this operation has not been derived yet.
    #[error("ratchet chain key uninitialised")]
    ChainUninitialised,

    /// AEAD authentication failed: tampered ciphertext, tampered header or
    /// associated data, or a message key we no longer hold.
    #[error("message decryption failed")]
    DecryptFailed,

    /// The message index lies behind the receive position with no skipped
    /// key retained: a duplicate or replayed envelope.
    #[error("old or replayed message: index {index}, chain already at {expected}")]
    OldOrReplay {
        /// Index claimed by the header.
        index: u32,
        /// Next index the receive chain expects.
        expected: u32,
    },

    /// Accepting this message would require deriving more skipped keys than
    /// the protocol allows.
    #[error("message gap of {gap} exceeds limit {limit}")]
    GapTooLarge {
        /// Number of keys that would need to be skipped.
        gap: u32,
        /// The configured cap.
        limit: u32,
    },

    /// A Diffie-Hellman computation rejected its inputs.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
