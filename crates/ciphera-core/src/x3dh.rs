//! X3DH: Extended Triple Diffie-Hellman session establishment.
//!
//! The initiator fetches the responder's pre-key bundle and computes three
//! or four DH values over identity, ephemeral, signed and optional one-time
//! pre-keys; the responder later computes the mirror image from the attached
//! [`PreKeyMessage`]. Both sides HKDF the concatenated outputs down to the
//! same 32-byte root key that seeds the Double Ratchet.
//!
//! The signed pre-key signature is verified before any DH is computed, so a
//! forged bundle fails fast without touching private key material.

use ciphera_crypto::{
    generate_x25519, kdf::hkdf_sha256, verify, Identity, SharedSecret, SymmetricKey, X25519Public,
    X25519Secret,
};
use ciphera_proto::{OneTimePreKeyId, PreKeyBundle, PreKeyMessage, SignedPreKeyId};
use zeroize::Zeroizing;

use crate::error::X3dhError;

/// HKDF info label for root-key derivation. Versioned so a future protocol
/// revision derives unrelated keys from identical inputs.
pub const X3DH_INFO: &[u8] = b"ciphera/x3dh-v1";

/// What the initiator walks away with: the root key plus everything the
/// responder will need to re-derive it.
pub struct InitiatorHandshake {
    /// The shared 32-byte root key.
    pub root_key: SymmetricKey,
    /// Which of the responder's signed pre-keys was used.
    pub signed_pre_key_id: SignedPreKeyId,
    /// Which one-time pre-key was consumed, if the bundle offered one.
    pub one_time_pre_key_id: Option<OneTimePreKeyId>,
    /// The initiator's ephemeral public key for this handshake.
    pub ephemeral_public: X25519Public,
}

impl std::fmt::Debug for InitiatorHandshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorHandshake")
            .field("signed_pre_key_id", &self.signed_pre_key_id)
            .field("one_time_pre_key_id", &self.one_time_pre_key_id)
            .field("ephemeral_public", &self.ephemeral_public)
            .finish_non_exhaustive()
    }
}

/// Initiator side: verify the bundle, generate an ephemeral key and derive
/// the root key.
///
/// Uses the first one-time pre-key in the bundle when present.
///
/// # Errors
///
/// [`X3dhError::BadSignedPreKey`] when the signed pre-key signature does not
/// verify; [`X3dhError::Crypto`] when a DH input is degenerate.
pub fn initiator_root(
    identity: &Identity,
    bundle: &PreKeyBundle,
) -> Result<InitiatorHandshake, X3dhError> {
    verify(
        &bundle.signing_key,
        bundle.signed_pre_key.as_bytes(),
        &bundle.signed_pre_key_signature,
    )
    .map_err(|_| X3dhError::BadSignedPreKey)?;

    let (ephemeral_priv, ephemeral_public) = generate_x25519();
    let one_time = bundle.one_time_pre_keys.first();

    let dh1 = identity.x_priv.diffie_hellman(&bundle.signed_pre_key)?;
    let dh2 = ephemeral_priv.diffie_hellman(&bundle.identity_key)?;
    let dh3 = ephemeral_priv.diffie_hellman(&bundle.signed_pre_key)?;
    let dh4 = one_time
        .map(|otk| ephemeral_priv.diffie_hellman(&otk.one_time_pre_key))
        .transpose()?;

    Ok(InitiatorHandshake {
        root_key: derive_root(&dh1, &dh2, &dh3, dh4.as_ref()),
        signed_pre_key_id: bundle.signed_pre_key_id.clone(),
        one_time_pre_key_id: one_time.map(|otk| otk.one_time_pre_key_id.clone()),
        ephemeral_public,
    })
}

/// Responder side: mirror the initiator's DH computations from the received
/// [`PreKeyMessage`] and our pre-key privates.
///
/// `one_time_pre_key_priv` must be the consumed private half matching
/// `message.one_time_pre_key_id`, or `None` when the initiator used none.
///
/// # Errors
///
/// [`X3dhError::Crypto`] when a DH input is degenerate.
pub fn responder_root(
    identity: &Identity,
    signed_pre_key_priv: &X25519Secret,
    one_time_pre_key_priv: Option<&X25519Secret>,
    message: &PreKeyMessage,
) -> Result<SymmetricKey, X3dhError> {
    let dh1 = signed_pre_key_priv.diffie_hellman(&message.initiator_identity_key)?;
    let dh2 = identity.x_priv.diffie_hellman(&message.ephemeral_key)?;
    let dh3 = signed_pre_key_priv.diffie_hellman(&message.ephemeral_key)?;
    let dh4 = one_time_pre_key_priv
        .map(|otk| otk.diffie_hellman(&message.ephemeral_key))
        .transpose()?;

    Ok(derive_root(&dh1, &dh2, &dh3, dh4.as_ref()))
}

/// HKDF the concatenated DH outputs (in protocol order) down to the root
/// key. The concatenation buffer is wiped when it drops.
fn derive_root(
    dh1: &SharedSecret,
    dh2: &SharedSecret,
    dh3: &SharedSecret,
    dh4: Option<&SharedSecret>,
) -> SymmetricKey {
    let mut ikm = Zeroizing::new(Vec::with_capacity(32 * 4));
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let mut okm = Zeroizing::new([0u8; 32]);
    hkdf_sha256(None, &ikm, X3DH_INFO, okm.as_mut());
    SymmetricKey::from_bytes(*okm)
}
