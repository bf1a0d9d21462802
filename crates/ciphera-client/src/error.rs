use ciphera_core::{RatchetError, X3dhError};
use ciphera_crypto::CryptoError;
use ciphera_proto::{SignedPreKeyId, Username};
use thiserror::Error;

use crate::{relay::RelayError, store::StoreError};

/// Errors surfaced by the client service layer.
///
/// Cryptographic and state errors are fatal to the operation that produced
/// them and never advance state silently. Transport errors are retriable at
/// the caller's discretion.
#[derive(Error, Debug)]
pub enum ClientError {
    /// No session exists with the peer; `start-session` must run first.
    #[error("no session with {0}; run start-session first")]
    NoSession(Username),

    /// No account profile for this relay; `register` must run first.
    #[error("no account for {username} on {server_url}; run register first")]
    NoAccount {
        /// The username that has no profile.
        username: Username,
        /// The relay it was looked up on.
        server_url: String,
    },

    /// The relay's canary does not match the one minted at registration:
    /// the relay lost the account or is impersonating it.
    #[error("relay canary mismatch for {username}: the relay state changed since registration")]
    CanaryMismatch {
        /// The account whose canary failed the check.
        username: Username,
    },

    /// A pre-key message referenced a signed pre-key we do not hold.
    #[error("unknown signed pre-key {0}")]
    UnknownSignedPreKey(SignedPreKeyId),

    /// The first message from a peer arrived without the pre-key material
    /// needed to establish the session.
    #[error("first message from {0} carries no usable pre-key message")]
    MissingPreKeyMessage(Username),

    /// A pre-key message arrived for a conversation that already exists.
    #[error("unexpected pre-key message from {0} on an established conversation")]
    UnexpectedPreKeyMessage(Username),

    /// A pre-key envelope claimed a non-zero message index.
    #[error("pre-key envelope from {peer} has message index {index}, expected 0")]
    InvalidFirstMessage {
        /// The claimed sender.
        peer: Username,
        /// The index the header carried.
        index: u32,
    },

    /// This operation needs a relay and none was configured.
    #[error("no relay configured; pass --relay")]
    RelayNotConfigured,

    /// Local storage failure, including a locked or missing identity.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Relay transport failure.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// X3DH handshake failure.
    #[error(transparent)]
    X3dh(#[from] X3dhError),

    /// Primitive-level failure outside a protocol operation, such as
    /// signing with corrupted key material.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Double Ratchet failure.
    #[error(transparent)]
    Ratchet(#[from] RatchetError),
}
