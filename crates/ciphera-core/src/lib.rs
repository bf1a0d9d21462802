//! The Ciphera protocol core.
//!
//! Two pieces, both pure state machines with no I/O:
//!
//! - [`x3dh`]: one-shot session establishment. The initiator combines its
//!   identity key and a fresh ephemeral key with the responder's published
//!   pre-keys; both sides derive the same 32-byte root key.
//! - [`ratchet`]: the Double Ratchet. A symmetric KDF chain evolves a key
//!   per message, and a Diffie-Hellman ratchet step re-keys both directions
//!   whenever the peer shows a new ratchet public key, giving forward
//!   secrecy and post-compromise security.
//!
//! [`RatchetState`] is serializable: callers persist it after every
//! successful encrypt or decrypt so a process restart resumes mid-stream
//! without reusing a message key.
//!
//! # Security
//!
//! - Every message header is bound into the AEAD associated data; tampering
//!   with any header field fails authentication.
//! - Replays and out-of-window indices are rejected with distinct error
//!   variants and never mutate state.
//! - Message keys for out-of-order delivery live in a bounded cache and are
//!   wiped on consumption or eviction.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod ratchet;
mod session;
pub mod x3dh;

pub use error::{RatchetError, X3dhError};
pub use ratchet::{RatchetState, MAX_IN_CHAIN_GAP, MAX_PREV_CHAIN_GAP, MAX_SKIPPED};
pub use session::{Conversation, Session};
pub use x3dh::InitiatorHandshake;
