//! The Double Ratchet state machine.
//!
//! Per peer, a [`RatchetState`] tracks a root chain plus one sending and one
//! receiving message chain. Each outbound message advances the sending chain
//! by one KDF step; each inbound message advances the receiving chain. When
//! an inbound header shows a ratchet public key we have not seen, a DH
//! ratchet step folds fresh entropy into the root and re-keys both chains.
//!
//! Out-of-order delivery is handled by deriving the message keys for the
//! indices being jumped over and stashing them in a bounded cache, keyed by
//! `(chain public key, index)`. A late message consumes its stashed key
//! without touching the live chain.
//!
//! # Invariants
//!
//! - A failed `decrypt` leaves the state untouched. All chain advancement is
//!   computed on locals and committed only after the AEAD verifies.
//! - `send_chain_key` absent means the next send performs a DH ratchet step
//!   first (the lazy responder step).
//! - Skipped keys are consumed at most once and wiped on removal.

use std::collections::BTreeMap;

use ciphera_crypto::{
    aead, generate_x25519, kdf::hkdf_sha256, SymmetricKey, X25519Public, X25519Secret,
};
use ciphera_proto::RatchetHeader;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::RatchetError;

/// HKDF info label for the root chain.
const LABEL_RK: &[u8] = b"DR|rk";

/// HKDF info label for both message chains.
const LABEL_CK: &[u8] = b"DR|ck";

/// HKDF info label for per-message nonce derivation.
const LABEL_NONCE: &[u8] = b"DR|nonce";

/// Cap on retained skipped message keys.
pub const MAX_SKIPPED: usize = 1000;

/// Largest tolerated jump within a single receive chain.
pub const MAX_IN_CHAIN_GAP: u32 = 2000;

/// Largest tolerated `previous_chain_length` overshoot on a ratchet step.
pub const MAX_PREV_CHAIN_GAP: u32 = 2000;

/// Per-peer Double Ratchet state.
///
/// Serializable so callers can persist it around every send and receive;
/// the serialized form contains live secrets and must only ever be written
/// to private storage.
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetState {
    /// Current root key.
    root_key: SymmetricKey,
    /// Our current ratchet private key.
    dh_priv: X25519Secret,
    /// Our current ratchet public key, sent in every header.
    dh_pub: X25519Public,
    /// The peer's current ratchet public key.
    peer_dh_pub: X25519Public,
    /// Sending chain key; absent until the first (lazy) sending step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    send_chain_key: Option<SymmetricKey>,
    /// Receiving chain key; absent until the peer's first ratchet step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recv_chain_key: Option<SymmetricKey>,
    /// Next outbound index on the sending chain.
    send_index: u32,
    /// Next expected inbound index on the receiving chain.
    recv_index: u32,
    /// Length of the previous sending chain, echoed in headers.
    previous_chain_length: u32,
    /// Skipped message keys, keyed by hex `chain_public || index_be`.
    skipped_keys: BTreeMap<String, SymmetricKey>,
}

/// Result of a DH ratchet step, staged until the triggering message
/// authenticates.
struct PeerStep {
    root_key: SymmetricKey,
    dh_priv: X25519Secret,
    dh_pub: X25519Public,
    send_chain_key: SymmetricKey,
}

impl RatchetState {
    /// Initialise as the session initiator.
    ///
    /// The initiator can send immediately: it ratchets against the peer's
    /// long-term identity key and derives a sending chain. No receiving
    /// chain exists until the peer answers with its own ratchet key.
    pub fn init_as_initiator(
        root: &SymmetricKey,
        peer_identity: &X25519Public,
    ) -> Result<Self, RatchetError> {
        let (dh_priv, dh_pub) = generate_x25519();
        let dh_out = dh_priv.diffie_hellman(peer_identity)?;
        let (root_key, send_chain_key) = kdf_rk(root, dh_out.as_bytes());

        Ok(Self {
            root_key,
            dh_priv,
            dh_pub,
            peer_dh_pub: *peer_identity,
            send_chain_key: Some(send_chain_key),
            recv_chain_key: None,
            send_index: 0,
            recv_index: 0,
            previous_chain_length: 0,
            skipped_keys: BTreeMap::new(),
        })
    }

    /// Initialise as the session responder.
    ///
    /// Mirrors the initiator: our identity private against the sender's
    /// first ratchet public yields the receiving chain. The sending chain is
    /// deliberately left absent; it is derived lazily on our first send so a
    /// pure receiver never generates a ratchet key it will not use.
    pub fn init_as_responder(
        root: &SymmetricKey,
        our_identity_priv: &X25519Secret,
        sender_ratchet_pub: &X25519Public,
    ) -> Result<Self, RatchetError> {
        let (dh_priv, dh_pub) = generate_x25519();
        let dh_out = our_identity_priv.diffie_hellman(sender_ratchet_pub)?;
        let (root_key, recv_chain_key) = kdf_rk(root, dh_out.as_bytes());

        Ok(Self {
            root_key,
            dh_priv,
            dh_pub,
            peer_dh_pub: *sender_ratchet_pub,
            send_chain_key: None,
            recv_chain_key: Some(recv_chain_key),
            send_index: 0,
            recv_index: 0,
            previous_chain_length: 0,
            skipped_keys: BTreeMap::new(),
        })
    }

    /// Our current ratchet public key.
    pub fn ratchet_public(&self) -> &X25519Public {
        &self.dh_pub
    }

    /// Next outbound message index.
    pub fn send_index(&self) -> u32 {
        self.send_index
    }

    /// Next expected inbound message index.
    pub fn recv_index(&self) -> u32 {
        self.recv_index
    }

    /// Number of retained skipped message keys.
    pub fn skipped_key_count(&self) -> usize {
        self.skipped_keys.len()
    }

    /// Encrypt one message, advancing the sending chain.
    ///
    /// Performs the lazy DH ratchet step first when no sending chain exists
    /// yet. The returned header must travel with the ciphertext unmodified:
    /// it is bound into the AEAD associated data as
    /// `user_ad || header_bytes`.
    pub fn encrypt(
        &mut self,
        user_ad: &[u8],
        plaintext: &[u8],
    ) -> Result<(RatchetHeader, Vec<u8>), RatchetError> {
        if self.send_chain_key.is_none() {
            let (next_priv, next_pub) = generate_x25519();
            let dh_out = next_priv.diffie_hellman(&self.peer_dh_pub)?;
            let (new_root, send_chain_key) = kdf_rk(&self.root_key, dh_out.as_bytes());

            self.previous_chain_length = self.send_index;
            self.send_index = 0;
            self.root_key = new_root;
            self.dh_priv = next_priv;
            self.dh_pub = next_pub;
            self.send_chain_key = Some(send_chain_key);
        }

        let chain = self.send_chain_key.as_ref().ok_or(RatchetError::ChainUninitialised)?;
        let (next_chain, message_key) = kdf_ck(chain);

        let header = RatchetHeader {
            dh_pub: self.dh_pub.as_bytes().to_vec(),
            previous_chain_length: self.previous_chain_length,
            message_index: self.send_index,
        };
        let aad = build_aad(user_ad, &header);
        let nonce = derive_nonce(&message_key);
        let ciphertext = aead::seal(message_key.as_bytes(), &nonce, plaintext, &aad);

        self.send_chain_key = Some(next_chain);
        self.send_index += 1;
        Ok((header, ciphertext))
    }

    /// Decrypt one message.
    ///
    /// Handles, in order: consumption of a stashed skipped key, replay and
    /// gap rejection, a DH ratchet step when the header shows a new peer
    /// key, skipping forward within the target chain, and finally the AEAD
    /// open. Any failure leaves the state unchanged.
    pub fn decrypt(
        &mut self,
        user_ad: &[u8],
        header: &RatchetHeader,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, RatchetError> {
        let header_key = header.ratchet_key().ok_or(RatchetError::InvalidHeader)?;
        let aad = build_aad(user_ad, header);

        // A message whose key was stashed earlier. The entry is only removed
        // once the ciphertext authenticates, and consuming it never touches
        // the live chain position.
        let key_id = skipped_key_id(&header_key, header.message_index);
        if let Some(message_key) = self.skipped_keys.get(&key_id) {
            let nonce = derive_nonce(message_key);
            let plaintext = aead::open(message_key.as_bytes(), &nonce, ciphertext, &aad)
                .map_err(|_| RatchetError::DecryptFailed)?;
            self.skipped_keys.remove(&key_id);
            return Ok(plaintext);
        }

        let same_chain = self.peer_dh_pub.ct_eq(&X25519Public::from_bytes(header_key));
        if same_chain {
            if header.message_index < self.recv_index {
                return Err(RatchetError::OldOrReplay {
                    index: header.message_index,
                    expected: self.recv_index,
                });
            }
            let gap = header.message_index - self.recv_index;
            if gap > MAX_IN_CHAIN_GAP {
                return Err(RatchetError::GapTooLarge { gap, limit: MAX_IN_CHAIN_GAP });
            }
        } else {
            if header.previous_chain_length > self.recv_index {
                let gap = header.previous_chain_length - self.recv_index;
                if gap > MAX_PREV_CHAIN_GAP {
                    return Err(RatchetError::GapTooLarge { gap, limit: MAX_PREV_CHAIN_GAP });
                }
            }
            // The new chain starts at index zero, so the header index is the
            // skip count on that chain.
            if header.message_index > MAX_IN_CHAIN_GAP {
                return Err(RatchetError::GapTooLarge {
                    gap: header.message_index,
                    limit: MAX_IN_CHAIN_GAP,
                });
            }
        }

        // From here on, all advancement happens on locals; self is only
        // written after the AEAD verifies.
        let mut recv_chain = self.recv_chain_key.clone();
        let mut recv_index = self.recv_index;
        let mut stash: Vec<([u8; 32], u32, SymmetricKey)> = Vec::new();
        let mut step: Option<PeerStep> = None;

        if !same_chain {
            // Close out the current receive chain: derive and stash the keys
            // for indices the peer says were sent before it ratcheted.
            while recv_index < header.previous_chain_length {
                let chain = recv_chain.as_ref().ok_or(RatchetError::ChainUninitialised)?;
                let (next_chain, message_key) = kdf_ck(chain);
                stash.push((*self.peer_dh_pub.as_bytes(), recv_index, message_key));
                recv_chain = Some(next_chain);
                recv_index += 1;
            }

            let peer = X25519Public::from_bytes(header_key);
            let dh_recv = self.dh_priv.diffie_hellman(&peer)?;
            let (root_after_recv, new_recv_chain) = kdf_rk(&self.root_key, dh_recv.as_bytes());

            let (next_priv, next_pub) = generate_x25519();
            let dh_send = next_priv.diffie_hellman(&peer)?;
            let (root_after_send, new_send_chain) = kdf_rk(&root_after_recv, dh_send.as_bytes());

            recv_chain = Some(new_recv_chain);
            recv_index = 0;
            step = Some(PeerStep {
                root_key: root_after_send,
                dh_priv: next_priv,
                dh_pub: next_pub,
                send_chain_key: new_send_chain,
            });
        }

        // Skip forward within the target chain, stashing each jumped key.
        while recv_index < header.message_index {
            let chain = recv_chain.as_ref().ok_or(RatchetError::ChainUninitialised)?;
            let (next_chain, message_key) = kdf_ck(chain);
            stash.push((header_key, recv_index, message_key));
            recv_chain = Some(next_chain);
            recv_index += 1;
        }

        let chain = recv_chain.as_ref().ok_or(RatchetError::ChainUninitialised)?;
        let (next_chain, message_key) = kdf_ck(chain);
        let nonce = derive_nonce(&message_key);
        let plaintext = aead::open(message_key.as_bytes(), &nonce, ciphertext, &aad)
            .map_err(|_| RatchetError::DecryptFailed)?;

        // Commit. Skipped keys from the previous chain are retained so late
        // messages from before the ratchet step stay decryptable.
        if let Some(step) = step {
            self.previous_chain_length = self.send_index;
            self.send_index = 0;
            self.root_key = step.root_key;
            self.dh_priv = step.dh_priv;
            self.dh_pub = step.dh_pub;
            self.send_chain_key = Some(step.send_chain_key);
            self.peer_dh_pub = X25519Public::from_bytes(header_key);
        }
        for (chain_pub, index, message_key) in stash {
            self.insert_skipped(&chain_pub, index, message_key);
        }
        self.recv_chain_key = Some(next_chain);
        self.recv_index = recv_index + 1;
        Ok(plaintext)
    }

    /// Stash a skipped message key, evicting under [`MAX_SKIPPED`].
    ///
    /// Eviction prefers the oldest index on the same chain, falling back to
    /// the map's first entry. Dropped values zeroise themselves.
    fn insert_skipped(&mut self, chain_pub: &[u8; 32], index: u32, message_key: SymmetricKey) {
        if self.skipped_keys.len() >= MAX_SKIPPED {
            let prefix = hex::encode(chain_pub);
            let victim = self
                .skipped_keys
                .range(prefix.clone()..)
                .next()
                .filter(|(id, _)| id.starts_with(&prefix))
                .or_else(|| self.skipped_keys.iter().next())
                .map(|(id, _)| id.clone());
            if let Some(victim) = victim {
                self.skipped_keys.remove(&victim);
            }
        }
        self.skipped_keys.insert(skipped_key_id(chain_pub, index), message_key);
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("send_index", &self.send_index)
            .field("recv_index", &self.recv_index)
            .field("previous_chain_length", &self.previous_chain_length)
            .field("has_send_chain", &self.send_chain_key.is_some())
            .field("has_recv_chain", &self.recv_chain_key.is_some())
            .field("skipped_keys", &self.skipped_keys.len())
            .finish_non_exhaustive()
    }
}

/// Root-chain KDF: fold a DH output into the root, yielding the new root
/// and a fresh chain key.
fn kdf_rk(root: &SymmetricKey, dh_out: &[u8; 32]) -> (SymmetricKey, SymmetricKey) {
    let mut okm = Zeroizing::new([0u8; 64]);
    hkdf_sha256(Some(root.as_bytes()), dh_out, LABEL_RK, okm.as_mut());
    split_okm(&okm)
}

/// Message-chain KDF: one step yields the next chain key and this message's
/// key.
fn kdf_ck(chain: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    let mut okm = Zeroizing::new([0u8; 64]);
    hkdf_sha256(Some(chain.as_bytes()), &[], LABEL_CK, okm.as_mut());
    split_okm(&okm)
}

/// Derive the AEAD nonce from a message key. Each message key is used for
/// exactly one seal, so the pair is unique by construction.
fn derive_nonce(message_key: &SymmetricKey) -> [u8; aead::NONCE_SIZE] {
    let mut nonce = [0u8; aead::NONCE_SIZE];
    hkdf_sha256(Some(message_key.as_bytes()), &[], LABEL_NONCE, &mut nonce);
    nonce
}

fn split_okm(okm: &[u8; 64]) -> (SymmetricKey, SymmetricKey) {
    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    (SymmetricKey::from_bytes(first), SymmetricKey::from_bytes(second))
}

/// Associated data for a message: caller bytes then the canonical header
/// serialization, binding the header to the ciphertext.
fn build_aad(user_ad: &[u8], header: &RatchetHeader) -> Vec<u8> {
    let mut aad = Vec::with_capacity(user_ad.len() + ciphera_proto::HEADER_SIZE);
    aad.extend_from_slice(user_ad);
    aad.extend_from_slice(&header.as_bytes());
    aad
}

/// Composite cache key for a skipped message key: hex of the chain public
/// key followed by the big-endian index. Hex keeps the map JSON-safe and
/// sorts entries by chain, then by index.
fn skipped_key_id(chain_pub: &[u8; 32], index: u32) -> String {
    let mut id = hex::encode(chain_pub);
    id.push_str(&hex::encode(index.to_be_bytes()));
    id
}
