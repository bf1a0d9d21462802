//! Persisted protocol state: sessions and conversations.

use ciphera_crypto::{SymmetricKey, X25519Public};
use ciphera_proto::{OneTimePreKeyId, SignedPreKeyId, Username};
use serde::{Deserialize, Serialize};

use crate::ratchet::RatchetState;

/// The outcome of an X3DH handshake with one peer.
///
/// Created once when the handshake completes and immutable afterwards. The
/// stored fields are exactly what the first outbound message needs to carry
/// so the responder can derive the same root key.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    /// The peer this session is with.
    pub peer: Username,
    /// The shared root key derived by X3DH.
    pub root_key: SymmetricKey,
    /// The peer's signed pre-key we handshook against.
    pub peer_signed_pre_key: X25519Public,
    /// The peer's long-term identity key.
    pub peer_identity_key: X25519Public,
    /// Unix seconds at session creation.
    pub created_utc: i64,
    /// Identifier of the peer's signed pre-key that was used.
    pub signed_pre_key_id: SignedPreKeyId,
    /// Identifier of the consumed one-time pre-key, when one was offered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_time_pre_key_id: Option<OneTimePreKeyId>,
    /// Our ephemeral public key from the handshake.
    pub initiator_ephemeral_key: X25519Public,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("signed_pre_key_id", &self.signed_pre_key_id)
            .field("one_time_pre_key_id", &self.one_time_pre_key_id)
            .field("created_utc", &self.created_utc)
            .finish_non_exhaustive()
    }
}

/// A peer's ratchet state together with its owner.
///
/// Exclusively mutated by the send and receive paths for that peer, and
/// persisted after every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// The peer this conversation is with.
    pub peer: Username,
    /// Live Double Ratchet state.
    pub state: RatchetState,
}
