//! Ciphera cryptographic primitives.
//!
//! Building blocks for the Ciphera protocol stack: X25519 key agreement,
//! Ed25519 signatures, HKDF-SHA256, ChaCha20-Poly1305 AEAD and the
//! passphrase envelope used to protect identity files at rest.
//!
//! Everything here is synchronous and deterministic given its inputs;
//! randomness enters only through explicit key generation.
//!
//! # Security
//!
//! - Secret material lives in fixed-size arrays wrapped in types that
//!   zeroise on drop ([`X25519Secret`], [`SymmetricKey`], [`SharedSecret`]).
//! - Diffie-Hellman outputs are checked for the all-zero point so low-order
//!   public keys are rejected instead of silently producing a weak secret.
//! - Comparisons of key material go through [`subtle`] and never through
//!   derived `PartialEq` on secrets.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod b64;
mod error;
pub mod kdf;
mod keys;
pub mod passphrase;

pub use error::CryptoError;
pub use keys::{
    fingerprint, generate_ed25519, generate_x25519, sign, verify, wipe, Ed25519Public,
    Ed25519Secret, Identity, SharedSecret, Signature, SymmetricKey, X25519Public, X25519Secret,
};
