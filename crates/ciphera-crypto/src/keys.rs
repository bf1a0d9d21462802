//! Key types and the operations defined over them.
//!
//! All fixed-length keys are 32 bytes except the Ed25519 private key, which
//! is the 64-byte keypair form (seed followed by public key). Secret types
//! zeroise their contents on drop; their `Debug` output is redacted.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{b64, error::CryptoError};

/// Length of a short fingerprint in raw bytes (20 hex characters).
const FINGERPRINT_BYTES: usize = 10;

/// An X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct X25519Public([u8; 32]);

impl X25519Public {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality, for use on the ratchet hot path where a
    /// variable-time comparison would leak which chain a message targets.
    pub fn ct_eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl std::fmt::Debug for X25519Public {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X25519Public({})", fingerprint(&self.0))
    }
}

impl serde::Serialize for X25519Public {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for X25519Public {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// An X25519 private key, clamped per RFC 7748.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X25519Secret([u8; 32]);

impl X25519Secret {
    /// Wrap raw (already clamped) key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> X25519Public {
        X25519Public(x25519_dalek::x25519(self.0, x25519_dalek::X25519_BASEPOINT_BYTES))
    }

    /// X25519 Diffie-Hellman.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidKey`] if the peer key is a low-order point and
    /// the shared secret degenerates to all zeroes.
    pub fn diffie_hellman(&self, public: &X25519Public) -> Result<SharedSecret, CryptoError> {
        let shared = x25519_dalek::x25519(self.0, public.0);
        if bool::from(shared.ct_eq(&[0u8; 32])) {
            return Err(CryptoError::InvalidKey);
        }
        Ok(SharedSecret(shared))
    }
}

impl std::fmt::Debug for X25519Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "X25519Secret([REDACTED])")
    }
}

impl serde::Serialize for X25519Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for X25519Secret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// A Diffie-Hellman shared secret. Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// A 32-byte symmetric key: root keys, chain keys and message keys.
///
/// Cloned freely while a protocol step needs it, zeroised as soon as the
/// last copy drops.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; 32]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &Self) -> bool {
        bool::from(self.0.ct_eq(&other.0))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

impl serde::Serialize for SymmetricKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for SymmetricKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// An Ed25519 public (verifying) key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Public([u8; 32]);

impl Ed25519Public {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Ed25519Public {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Public({})", fingerprint(&self.0))
    }
}

impl serde::Serialize for Ed25519Public {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Ed25519Public {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// An Ed25519 private key in 64-byte keypair form.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Ed25519Secret([u8; 64]);

impl Ed25519Secret {
    /// Wrap raw keypair bytes (seed followed by public key).
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw keypair bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for Ed25519Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Secret([REDACTED])")
    }
}

impl serde::Serialize for Ed25519Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Ed25519Secret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// A detached Ed25519 signature.
#[derive(Clone, Copy)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        b64::serialize(&self.0, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(b64::deserialize_array(deserializer)?))
    }
}

/// Long-term identity: an X25519 pair for key agreement and an Ed25519 pair
/// for signing pre-keys.
///
/// The Ed25519 key signs exactly one pre-key at a time; rotation happens by
/// generating a fresh identity.
pub struct Identity {
    /// X25519 private key.
    pub x_priv: X25519Secret,
    /// X25519 public key.
    pub x_pub: X25519Public,
    /// Ed25519 private key (keypair form).
    pub ed_priv: Ed25519Secret,
    /// Ed25519 public key.
    pub ed_pub: Ed25519Public,
}

impl Identity {
    /// Generate a fresh identity from the OS random number generator.
    pub fn generate() -> Self {
        let (x_priv, x_pub) = generate_x25519();
        let (ed_priv, ed_pub) = generate_ed25519();
        Self { x_priv, x_pub, ed_priv, ed_pub }
    }

    /// Short fingerprint of the X25519 public key, as shown to users.
    pub fn fingerprint(&self) -> String {
        fingerprint(self.x_pub.as_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("x_pub", &self.x_pub)
            .field("ed_pub", &self.ed_pub)
            .finish_non_exhaustive()
    }
}

/// Generate an X25519 key pair.
///
/// Samples 32 random bytes, clamps them per RFC 7748 and derives the public
/// key by scalar multiplication with the basepoint.
pub fn generate_x25519() -> (X25519Secret, X25519Public) {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    raw[0] &= 0xF8;
    raw[31] = (raw[31] & 0x7F) | 0x40;

    let secret = X25519Secret(raw);
    let public = secret.public_key();
    raw.zeroize();
    (secret, public)
}

/// Generate an Ed25519 key pair.
pub fn generate_ed25519() -> (Ed25519Secret, Ed25519Public) {
    let signing = SigningKey::generate(&mut OsRng);
    let public = Ed25519Public(signing.verifying_key().to_bytes());
    (Ed25519Secret(signing.to_keypair_bytes()), public)
}

/// Sign `message` with an Ed25519 private key.
///
/// # Errors
///
/// [`CryptoError::InvalidKey`] if the keypair bytes are inconsistent, which
/// only happens when loading corrupted key material.
pub fn sign(key: &Ed25519Secret, message: &[u8]) -> Result<Signature, CryptoError> {
    let signing =
        SigningKey::from_keypair_bytes(&key.0).map_err(|_| CryptoError::InvalidKey)?;
    Ok(Signature(signing.sign(message).to_bytes()))
}

/// Verify an Ed25519 signature over `message`.
///
/// # Errors
///
/// [`CryptoError::InvalidKey`] when the public key does not decode,
/// [`CryptoError::BadSignature`] when the signature does not verify.
pub fn verify(
    key: &Ed25519Public,
    message: &[u8],
    signature: &Signature,
) -> Result<(), CryptoError> {
    let verifying = VerifyingKey::from_bytes(&key.0).map_err(|_| CryptoError::InvalidKey)?;
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying.verify(message, &sig).map_err(|_| CryptoError::BadSignature)
}

/// Short hex fingerprint of a public key: SHA-256 truncated to 10 bytes,
/// rendered as 20 hex characters.
pub fn fingerprint(public: &[u8]) -> String {
    let digest = Sha256::digest(public);
    hex::encode(&digest[..FINGERPRINT_BYTES])
}

/// Overwrite a buffer with zeroes in a way the compiler cannot elide.
pub fn wipe(buf: &mut [u8]) {
    buf.zeroize();
}
