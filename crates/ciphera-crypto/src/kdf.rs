//! HKDF-SHA256 key derivation.

use hkdf::Hkdf;
use sha2::Sha256;

/// Fill `okm` with HKDF-SHA256 output.
///
/// `salt` of `None` uses the RFC 5869 default (a zero-filled block). Output
/// lengths in this crate are at most 64 bytes, far below the HKDF limit, so
/// expansion cannot fail.
pub fn hkdf_sha256(salt: Option<&[u8]>, ikm: &[u8], info: &[u8], okm: &mut [u8]) {
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm)
        .expect("invariant: output length below HKDF-SHA256 limit");
}
